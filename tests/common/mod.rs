//! Shared fixtures for the integration suites: hand-assembled WAV
//! files, a manually pulled output backend, and signal analysis
//! helpers.

#![allow(dead_code)]

use std::{
    path::Path,
    sync::{Arc, Mutex},
};

use tempfile::TempDir;

use crescendo::{
    audio::SampleFormat,
    error::{Error, Result},
    output::{
        AudioCallback, AudioDeviceInfo, AudioOutput, AudioOutputConfig, NegotiatedFormat,
    },
};

/// Builds a PCM WAV file from a per-frame sample generator.
///
/// `bits` is 16 or 32; `generate` receives the frame index and returns
/// one sample in `[-1.0, 1.0]` used for every channel of that frame.
pub fn write_wav(
    path: &Path,
    sample_rate: u32,
    channels: u16,
    bits: u16,
    frames: u32,
    mut generate: impl FnMut(u32) -> f32,
) {
    assert!(bits == 16 || bits == 32, "unsupported fixture bit depth");
    let bytes_per_sample = u32::from(bits / 8);
    let data_len = frames * u32::from(channels) * bytes_per_sample;

    let mut bytes = Vec::with_capacity(44 + data_len as usize);
    bytes.extend_from_slice(b"RIFF");
    bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
    bytes.extend_from_slice(b"WAVE");
    bytes.extend_from_slice(b"fmt ");
    bytes.extend_from_slice(&16_u32.to_le_bytes());
    bytes.extend_from_slice(&1_u16.to_le_bytes()); // PCM
    bytes.extend_from_slice(&channels.to_le_bytes());
    bytes.extend_from_slice(&sample_rate.to_le_bytes());
    bytes.extend_from_slice(
        &(sample_rate * u32::from(channels) * bytes_per_sample).to_le_bytes(),
    );
    bytes.extend_from_slice(&(channels * (bits / 8)).to_le_bytes());
    bytes.extend_from_slice(&bits.to_le_bytes());
    bytes.extend_from_slice(b"data");
    bytes.extend_from_slice(&data_len.to_le_bytes());

    for i in 0..frames {
        let value = generate(i).clamp(-1.0, 1.0);
        for _ in 0..channels {
            if bits == 16 {
                let sample = (value * f32::from(i16::MAX)) as i16;
                bytes.extend_from_slice(&sample.to_le_bytes());
            } else {
                let sample = (f64::from(value) * f64::from(i32::MAX)) as i32;
                bytes.extend_from_slice(&sample.to_le_bytes());
            }
        }
    }

    std::fs::write(path, bytes).expect("failed to write WAV fixture");
}

/// A scratch directory for fixture files.
///
/// The directory and everything in it are removed when the guard drops,
/// assertion panics included; keep the guard alive for the whole test.
pub fn scratch_dir() -> TempDir {
    tempfile::Builder::new()
        .prefix("crescendo-it-")
        .tempdir()
        .expect("failed to create scratch directory")
}

/// Output backend pulled by the test instead of a device thread.
pub struct MockOutput {
    callback: Arc<Mutex<Option<AudioCallback>>>,
    rate: u32,
    channels: u32,
    open: bool,
}

/// Handle for pulling buffers through the installed callback.
#[derive(Clone)]
pub struct MockHandle {
    callback: Arc<Mutex<Option<AudioCallback>>>,
    channels: usize,
}

impl MockHandle {
    /// Pulls `frames` frames through the engine callback.
    pub fn pull(&self, frames: usize) -> Vec<f32> {
        let mut buffer = vec![0.0; frames * self.channels];
        if let Some(callback) = self.callback.lock().unwrap().as_mut() {
            callback(&mut buffer, frames);
        }
        buffer
    }

    /// Number of interleaved channels per pulled frame.
    pub fn channels(&self) -> usize {
        self.channels
    }
}

/// Creates a mock output negotiating the given format.
pub fn mock_output(rate: u32, channels: u32) -> (Box<MockOutput>, MockHandle) {
    let callback = Arc::new(Mutex::new(None));
    let output = Box::new(MockOutput {
        callback: Arc::clone(&callback),
        rate,
        channels,
        open: false,
    });
    let handle = MockHandle {
        callback,
        channels: channels as usize,
    };
    (output, handle)
}

impl AudioOutput for MockOutput {
    fn enumerate_devices(&self) -> Result<Vec<AudioDeviceInfo>> {
        Ok(vec![AudioDeviceInfo {
            id: "mock".to_string(),
            name: "mock".to_string(),
            max_channels: self.channels,
            default_sample_rate: self.rate,
            is_default: true,
        }])
    }

    fn open(&mut self, config: AudioOutputConfig) -> Result<NegotiatedFormat> {
        *self.callback.lock().unwrap() = Some(config.callback);
        self.open = true;
        Ok(NegotiatedFormat {
            sample_rate: self.rate,
            channels: self.channels,
            format: SampleFormat::Float32,
            buffer_frames: 1024,
        })
    }

    fn start(&mut self) -> Result<()> {
        if !self.open {
            return Err(Error::invalid_state("not open"));
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
        *self.callback.lock().unwrap() = None;
    }

    fn latency_ms(&self) -> u32 {
        21
    }

    fn set_volume(&mut self, _volume: f32) -> Result<()> {
        Ok(())
    }

    fn get_volume(&self) -> f32 {
        1.0
    }
}

/// RMS of a sample slice.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
}

/// Peak magnitude of a sample slice.
pub fn peak(samples: &[f32]) -> f32 {
    samples.iter().fold(0.0_f32, |a, &b| a.max(b.abs()))
}

/// Converts a linear ratio to dB, with a floor for silence.
pub fn db(ratio: f32) -> f32 {
    if ratio < 1e-10 {
        return -200.0;
    }
    20.0 * ratio.log10()
}

/// Goertzel single-bin power of `samples` (mono) at `freq`.
///
/// Returns the amplitude of the tone at `freq`, comparable across
/// frequencies for a fixed window length.
pub fn goertzel(samples: &[f32], freq: f32, sample_rate: f32) -> f32 {
    let omega = 2.0 * std::f32::consts::PI * freq / sample_rate;
    let coefficient = 2.0 * omega.cos();

    let mut s_prev = 0.0_f32;
    let mut s_prev2 = 0.0_f32;
    for &sample in samples {
        let s = sample + coefficient * s_prev - s_prev2;
        s_prev2 = s_prev;
        s_prev = s;
    }

    let power = s_prev2 * s_prev2 + s_prev * s_prev - coefficient * s_prev * s_prev2;
    (power.max(0.0)).sqrt() * 2.0 / samples.len() as f32
}

/// Extracts one channel from interleaved samples.
pub fn deinterleave(samples: &[f32], channels: usize, channel: usize) -> Vec<f32> {
    samples
        .chunks_exact(channels)
        .map(|frame| frame[channel])
        .collect()
}
