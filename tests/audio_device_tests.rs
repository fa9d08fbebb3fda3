//! Smoke tests that need real audio hardware.
//!
//! ```bash
//! cargo test --features test-audio --test audio_device_tests
//! ```
#![cfg(feature = "test-audio")]

use agent_voice_rs::audio::PcmAudio;
use agent_voice_rs::audio_sink::Speaker;
use agent_voice_rs::audio_source::Microphone;
use std::time::Duration;
use tokio::sync::oneshot;

#[test]
fn test_play_short_tone() {
    let speaker = Speaker::open().expect("output device");
    let samples: Vec<i16> = (0..12_000)
        .map(|i| ((i as f32 * 2.0 * std::f32::consts::PI * 440.0 / 24_000.0).sin() * 4000.0) as i16)
        .collect();
    speaker.play(&PcmAudio::new(samples, 24_000)).unwrap();
}

#[test]
fn test_record_half_second() {
    let microphone = Microphone::open(24_000).expect("input device");
    let (stop_tx, stop_rx) = oneshot::channel();
    std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(500));
        let _ = stop_tx.send(());
    });

    let recorded = microphone.record_until(stop_rx).unwrap();
    assert_eq!(recorded.sample_rate, 24_000);
    assert!(recorded.duration_secs() > 0.3);
}
