//! Speaker playback for the terminal front-end.

use crate::audio::{resample, AudioError, PcmAudio};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

// Headroom over the audio length before playback counts as stuck
const PLAYBACK_SLACK: Duration = Duration::from_secs(2);

/// Flags shared with the output callback
#[derive(Default)]
struct Playback {
    drained: AtomicBool,
    failed: AtomicBool,
}

impl Playback {
    /// Block until the queue drains, the stream fails or `deadline` passes.
    fn wait(&self, deadline: Duration) -> Result<(), AudioError> {
        let started = Instant::now();
        loop {
            if self.failed.load(Ordering::Acquire) {
                return Err(AudioError::Device("Output stream failed during playback".to_string()));
            }
            if self.drained.load(Ordering::Acquire) {
                return Ok(());
            }
            if started.elapsed() >= deadline {
                return Err(AudioError::Device(format!(
                    "Playback did not finish within {:.1}s",
                    deadline.as_secs_f32()
                )));
            }
            std::thread::sleep(Duration::from_millis(20));
        }
    }
}

/// Plays PCM on the default output device
pub struct Speaker {
    device: cpal::Device,
    config: StreamConfig,
    sample_format: SampleFormat,
}

impl Speaker {
    pub fn open() -> Result<Self, AudioError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| AudioError::Device("No output device found".to_string()))?;

        let supported = device
            .default_output_config()
            .map_err(|e| AudioError::Device(e.to_string()))?;
        log::debug!("AudioSink: Using output config: {:?}", supported);

        Ok(Self {
            device,
            sample_format: supported.sample_format(),
            config: supported.config(),
        })
    }

    /// Play `audio` to the end. Blocks the calling thread.
    pub fn play(&self, audio: &PcmAudio) -> Result<(), AudioError> {
        if audio.is_empty() {
            return Ok(());
        }

        let as_f32: Vec<f32> = audio.samples.iter().map(|&s| s as f32 / 32768.0).collect();
        let device_rate = self.config.sample_rate.0;
        let mono = resample(&as_f32, audio.sample_rate, device_rate)?;
        let queue = Arc::new(Mutex::new(mono.into_iter().collect::<VecDeque<f32>>()));
        let progress = Arc::new(Playback::default());

        let stream = match self.sample_format {
            SampleFormat::I16 => self.build_stream::<i16>(Arc::clone(&queue), Arc::clone(&progress))?,
            SampleFormat::U16 => self.build_stream::<u16>(Arc::clone(&queue), Arc::clone(&progress))?,
            SampleFormat::F32 => self.build_stream::<f32>(Arc::clone(&queue), Arc::clone(&progress))?,
            format => {
                return Err(AudioError::Device(format!(
                    "Unsupported output format: {:?}",
                    format
                )))
            }
        };
        stream
            .play()
            .map_err(|e| AudioError::Device(format!("Failed to start playback: {}", e)))?;

        log::info!("🔊 Playing {:.1}s of audio", audio.duration_secs());
        let deadline = Duration::from_secs_f32(audio.duration_secs()) + PLAYBACK_SLACK;
        progress.wait(deadline)?;
        // Let the device flush its last period
        std::thread::sleep(Duration::from_millis(100));
        Ok(())
    }

    fn build_stream<T>(
        &self,
        queue: Arc<Mutex<VecDeque<f32>>>,
        progress: Arc<Playback>,
    ) -> Result<Stream, AudioError>
    where
        T: SizedSample + FromSample<f32>,
    {
        let channels = self.config.channels.max(1) as usize;
        let errors = Arc::clone(&progress);
        self.device
            .build_output_stream(
                &self.config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    let mut queue = queue.lock().unwrap_or_else(|e| e.into_inner());
                    for frame in data.chunks_mut(channels) {
                        let sample = queue.pop_front().unwrap_or(0.0);
                        for out in frame.iter_mut() {
                            *out = T::from_sample(sample);
                        }
                    }
                    if queue.is_empty() {
                        progress.drained.store(true, Ordering::Release);
                    }
                },
                move |err| {
                    log::error!("Output stream error: {}", err);
                    errors.failed.store(true, Ordering::Release);
                },
                None,
            )
            .map_err(|e| AudioError::Device(format!("Failed to build output stream: {}", e)))
    }
}
