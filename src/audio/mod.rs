//! Audio normalization and assembly at the transport boundary.
//!
//! Inbound blobs in any supported container are decoded to mono 16-bit PCM
//! at the pipeline rate; outbound PCM chunks are assembled back into WAV.

pub mod decode;
pub mod resampler;
pub mod wav;

pub use decode::normalize;
pub use resampler::resample;
pub use wav::{decode_wav, encode_wav, pcm_from_le_bytes, pcm_to_le_bytes};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Unsupported or malformed audio: {0}")]
    Decode(String),

    #[error("Audio input is empty")]
    Empty,

    #[error("Resampling failed: {0}")]
    Resampling(String),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("Audio device error: {0}")]
    Device(String),
}

/// Mono 16-bit PCM with its sample rate
#[derive(Debug, Clone, PartialEq)]
pub struct PcmAudio {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
}

impl PcmAudio {
    pub fn new(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn duration_secs(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f32 / self.sample_rate as f32
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
