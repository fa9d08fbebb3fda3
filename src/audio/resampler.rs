use super::AudioError;
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

const CHUNK_SIZE: usize = 1024;

/// Resample a mono f32 buffer from `from_rate` to `to_rate`.
///
/// The output holds `round(len * to_rate / from_rate)` samples: the filter
/// delay is trimmed from the front and the tail is flushed.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>, AudioError> {
    if from_rate == 0 || to_rate == 0 {
        return Err(AudioError::Resampling("sample rate must be non-zero".to_string()));
    }
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let ratio = to_rate as f64 / from_rate as f64;
    let params = SincInterpolationParameters {
        sinc_len: 32,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 128,
        window: WindowFunction::BlackmanHarris2,
    };

    let mut resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, CHUNK_SIZE, 1)
        .map_err(|e| AudioError::Resampling(e.to_string()))?;

    let delay = resampler.output_delay();
    let expected = (samples.len() as f64 * ratio).round() as usize;
    let mut output = Vec::with_capacity(expected + delay);

    log::debug!(
        "🔄 Resampling {} samples {}Hz → {}Hz (ratio: {:.3})",
        samples.len(),
        from_rate,
        to_rate,
        ratio
    );

    let mut chunks = samples.chunks_exact(CHUNK_SIZE);
    for chunk in &mut chunks {
        let frames = resampler
            .process(&[chunk][..], None)
            .map_err(|e| AudioError::Resampling(e.to_string()))?;
        output.extend_from_slice(&frames[0]);
    }

    let remainder = chunks.remainder();
    if !remainder.is_empty() {
        let frames = resampler
            .process_partial(Some(&[remainder][..]), None)
            .map_err(|e| AudioError::Resampling(e.to_string()))?;
        output.extend_from_slice(&frames[0]);
    }

    // Flush the filter until the delayed tail is out
    while output.len() < expected + delay {
        let frames = resampler
            .process_partial::<&[f32]>(None, None)
            .map_err(|e| AudioError::Resampling(e.to_string()))?;
        if frames[0].is_empty() {
            break;
        }
        output.extend_from_slice(&frames[0]);
    }

    output.drain(..delay.min(output.len()));
    output.truncate(expected);
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, rate: u32, secs: f32) -> Vec<f32> {
        let len = (rate as f32 * secs) as usize;
        (0..len)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / rate as f32).sin() * 0.5)
            .collect()
    }

    #[test]
    fn test_same_rate_is_identity() {
        let input = sine(440.0, 24_000, 0.1);
        assert_eq!(resample(&input, 24_000, 24_000).unwrap(), input);
    }

    #[test]
    fn test_upsample_length() {
        let input = sine(440.0, 16_000, 1.0);
        let output = resample(&input, 16_000, 24_000).unwrap();
        assert_eq!(output.len(), 24_000);
    }

    #[test]
    fn test_downsample_length_and_level() {
        let input = sine(440.0, 48_000, 0.5);
        let output = resample(&input, 48_000, 24_000).unwrap();
        assert_eq!(output.len(), 12_000);

        // Energy of a 440Hz tone survives the conversion
        let peak = output.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
        assert!(peak > 0.4 && peak < 0.6, "peak was {}", peak);
    }

    #[test]
    fn test_zero_rate_rejected() {
        assert!(resample(&[0.0; 10], 0, 24_000).is_err());
    }
}
