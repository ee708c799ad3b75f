//! Audio output contract.
//!
//! The platform output is a *pull* collaborator: after `open`, a
//! real-time thread owned by the backend invokes the configured callback
//! whenever the device needs audio, and the callback must fill the whole
//! buffer before the device deadline. Everything upstream of the output
//! is demand-driven within one callback invocation.
//!
//! `stop` joins the callback thread: once it returns, no callback
//! invocation is in progress and the engine may mutate the structures
//! the callback reads.

pub mod cpal;

use crate::{audio::SampleFormat, error::Result};

/// Callback invoked on the backend's real-time thread.
///
/// Receives the interleaved output buffer and the frame count; must fill
/// `frames * channels` samples of silence-or-audio before returning and
/// must not block, allocate or panic.
pub type AudioCallback = Box<dyn FnMut(&mut [f32], usize) + Send + 'static>;

/// Description of an output device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AudioDeviceInfo {
    /// Backend-specific identifier, passed back in `AudioOutputConfig`.
    pub id: String,
    /// Human-readable device name.
    pub name: String,
    /// Maximum supported channels.
    pub max_channels: u32,
    /// Default sample rate in Hz.
    pub default_sample_rate: u32,
    /// True for the system default device.
    pub is_default: bool,
}

/// Requested output configuration.
pub struct AudioOutputConfig {
    /// Device to use; `None` selects the system default.
    pub device_id: Option<String>,
    /// Desired sample rate in Hz.
    pub sample_rate: u32,
    /// Desired channel count.
    pub channels: u32,
    /// Desired sample format.
    pub format: SampleFormat,
    /// Buffer size in frames; bounds the callback deadline.
    pub buffer_frames: u32,
    /// The pull callback.
    pub callback: AudioCallback,
}

/// The format the backend actually opened.
///
/// When the requested format is unavailable the backend substitutes the
/// device mix format and reports it here; the engine adapts its
/// downstream sample-rate conversion target accordingly.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct NegotiatedFormat {
    /// Actual sample rate in Hz.
    pub sample_rate: u32,
    /// Actual channel count.
    pub channels: u32,
    /// Actual sample format.
    pub format: SampleFormat,
    /// Actual buffer size in frames.
    pub buffer_frames: u32,
}

/// Pull-model audio output backend.
pub trait AudioOutput: Send {
    /// Lists available output devices.
    ///
    /// # Errors
    ///
    /// Returns error when the backend cannot enumerate devices.
    fn enumerate_devices(&self) -> Result<Vec<AudioDeviceInfo>>;

    /// Opens the output with `config`, negotiating the actual format.
    ///
    /// # Errors
    ///
    /// Returns error when the device is missing or the configuration
    /// cannot be satisfied even by substitution.
    fn open(&mut self, config: AudioOutputConfig) -> Result<NegotiatedFormat>;

    /// Starts pulling audio through the callback.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` when the output is not open.
    fn start(&mut self) -> Result<()>;

    /// Stops pulling and joins the callback thread.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` when the output is not open.
    fn stop(&mut self) -> Result<()>;

    /// Closes the output, releasing the device. Idempotent.
    fn close(&mut self);

    /// Current output latency in milliseconds.
    fn latency_ms(&self) -> u32;

    /// Sets the master volume in `0.0..=1.0`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` for values outside the range.
    fn set_volume(&mut self, volume: f32) -> Result<()>;

    /// Current master volume.
    fn get_volume(&self) -> f32;
}
