//! Microphone capture for the terminal front-end.

use crate::audio::{resample, AudioError, PcmAudio};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

/// Captures from the default input device until told to stop
pub struct Microphone {
    device: cpal::Device,
    config: StreamConfig,
    sample_format: SampleFormat,
    target_rate: u32,
}

impl Microphone {
    pub fn open(target_rate: u32) -> Result<Self, AudioError> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| AudioError::Device("No default input device available".to_string()))?;

        let supported = device
            .default_input_config()
            .map_err(|e| AudioError::Device(format!("Failed to get input config: {}", e)))?;

        log::info!(
            "🎤 Input device: {} ({:?}, {} ch, {} Hz)",
            device.name().unwrap_or_else(|_| "unknown".to_string()),
            supported.sample_format(),
            supported.channels(),
            supported.sample_rate().0
        );

        Ok(Self {
            device,
            sample_format: supported.sample_format(),
            config: supported.config(),
            target_rate,
        })
    }

    /// Record until `stop` resolves, then return mono PCM at the target rate.
    /// Blocks the calling thread.
    pub fn record_until(&self, stop: oneshot::Receiver<()>) -> Result<PcmAudio, AudioError> {
        let captured = Arc::new(Mutex::new(Vec::<f32>::new()));

        let stream = match self.sample_format {
            SampleFormat::I16 => self.build_stream::<i16>(Arc::clone(&captured))?,
            SampleFormat::U16 => self.build_stream::<u16>(Arc::clone(&captured))?,
            SampleFormat::F32 => self.build_stream::<f32>(Arc::clone(&captured))?,
            format => {
                return Err(AudioError::Device(format!(
                    "Unsupported input format: {:?}",
                    format
                )))
            }
        };
        stream
            .play()
            .map_err(|e| AudioError::Device(format!("Failed to start stream: {}", e)))?;

        // A dropped sender counts as stop too
        let _ = stop.blocking_recv();
        drop(stream);

        let interleaved = std::mem::take(&mut *captured.lock().unwrap_or_else(|e| e.into_inner()));
        let channels = self.config.channels.max(1) as usize;
        let mono: Vec<f32> = interleaved
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect();

        let resampled = resample(&mono, self.config.sample_rate.0, self.target_rate)?;
        let samples = resampled
            .into_iter()
            .map(|s| s.clamp(-1.0, 1.0).to_sample::<i16>())
            .collect::<Vec<_>>();

        log::info!(
            "🎤 Recorded {:.1}s of audio",
            samples.len() as f32 / self.target_rate as f32
        );
        Ok(PcmAudio::new(samples, self.target_rate))
    }

    fn build_stream<T>(&self, captured: Arc<Mutex<Vec<f32>>>) -> Result<Stream, AudioError>
    where
        T: SizedSample,
        f32: FromSample<T>,
    {
        self.device
            .build_input_stream(
                &self.config,
                move |data: &[T], _: &cpal::InputCallbackInfo| {
                    let mut buffer = captured.lock().unwrap_or_else(|e| e.into_inner());
                    buffer.extend(data.iter().map(|&s| f32::from_sample(s)));
                },
                |err| log::error!("Input stream error: {}", err),
                None,
            )
            .map_err(|e| AudioError::Device(format!("Failed to build input stream: {}", e)))
    }
}
