use super::{AudioError, PcmAudio};
use std::io::Cursor;

/// Assemble mono 16-bit PCM into a WAV container
pub fn encode_wav(samples: &[i16], sample_rate: u32) -> Result<Vec<u8>, AudioError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::with_capacity(44 + samples.len() * 2));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        let mut writer16 = writer.get_i16_writer(samples.len() as u32);
        for &sample in samples {
            writer16.write_sample(sample);
        }
        writer16.flush()?;
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

/// Read a 16-bit integer WAV, downmixing to mono
pub fn decode_wav(bytes: &[u8]) -> Result<PcmAudio, AudioError> {
    let mut reader = hound::WavReader::new(Cursor::new(bytes))?;
    let spec = reader.spec();

    if spec.sample_format != hound::SampleFormat::Int || spec.bits_per_sample != 16 {
        return Err(AudioError::Decode(format!(
            "expected 16-bit integer WAV, got {}-bit {:?}",
            spec.bits_per_sample, spec.sample_format
        )));
    }

    let interleaved = reader
        .samples::<i16>()
        .collect::<Result<Vec<i16>, _>>()?;

    let channels = spec.channels.max(1) as usize;
    let samples = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks_exact(channels)
            .map(|frame| {
                let sum: i32 = frame.iter().map(|&s| s as i32).sum();
                (sum / channels as i32) as i16
            })
            .collect()
    };

    Ok(PcmAudio::new(samples, spec.sample_rate))
}

/// Serialize samples as s16le, the raw binary frame format sent to clients
pub fn pcm_to_le_bytes(samples: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    bytes
}

/// Parse s16le bytes. A trailing odd byte is ignored.
pub fn pcm_from_le_bytes(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}
