//! cpal-backed output device.
//!
//! Default backend for all desktop platforms. Opens the requested device
//! and sample rate when the hardware offers them and falls back to the
//! device's default ("mix") configuration otherwise, reporting whatever
//! was actually negotiated. The stream callback pulls `f32` frames from
//! the engine callback and applies the master volume last.
//!
//! `stop` drops the cpal stream, which joins the backend's callback
//! thread; the engine relies on that to mutate slot state safely. The
//! engine callback itself lives in an `Arc<Mutex>` so a later `start`
//! can rebuild the stream around it.

use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc, Mutex,
};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use crate::{
    audio::SampleFormat,
    error::{Error, Result},
    util::ToF32,
};

use super::{AudioCallback, AudioDeviceInfo, AudioOutput, AudioOutputConfig, NegotiatedFormat};

/// Shared with the stream closure; survives stream rebuilds.
struct Shared {
    callback: Mutex<AudioCallback>,
    /// Master volume as raw `f32` bits.
    volume_bits: AtomicU32,
}

/// `cpal::Stream` is `!Send` as a precaution for some mobile backends.
struct StreamHandle(cpal::Stream);

// SAFETY: the stream is created, started and dropped on the engine's
// control thread only; it is never accessed concurrently.
unsafe impl Send for StreamHandle {}

/// cpal output backend.
pub struct CpalOutput {
    device: Option<cpal::Device>,
    stream: Option<StreamHandle>,
    shared: Option<Arc<Shared>>,
    negotiated: Option<NegotiatedFormat>,
    running: bool,
}

impl CpalOutput {
    /// Creates a closed backend.
    #[must_use]
    pub fn new() -> Self {
        Self {
            device: None,
            stream: None,
            shared: None,
            negotiated: None,
            running: false,
        }
    }

    /// Finds the device named `id`, or the default output device.
    fn find_device(device_id: Option<&str>) -> Result<cpal::Device> {
        let host = cpal::default_host();
        match device_id {
            None => host
                .default_output_device()
                .ok_or_else(|| Error::file_not_found("no default audio output device")),
            Some(id) => {
                let mut devices = host.output_devices()?;
                devices
                    .find(|device| device.name().is_ok_and(|name| name.eq_ignore_ascii_case(id)))
                    .ok_or_else(|| {
                        Error::file_not_found(format!("audio output device {id} not found"))
                    })
            }
        }
    }

    /// Picks a stream configuration, preferring the requested rate and
    /// channel count in `f32`, else the device default.
    fn negotiate(
        device: &cpal::Device,
        requested: &AudioOutputConfig,
    ) -> Result<(cpal::StreamConfig, NegotiatedFormat)> {
        let wanted_rate = cpal::SampleRate(requested.sample_rate);
        let exact = device.supported_output_configs()?.find_map(|range| {
            if u32::from(range.channels()) == requested.channels
                && range.sample_format() == cpal::SampleFormat::F32
            {
                range.try_with_sample_rate(wanted_rate)
            } else {
                None
            }
        });

        let supported = match exact {
            Some(config) => config,
            None => {
                let mix = device.default_output_config()?;
                info!(
                    "requested format unavailable, using device mix format: {} Hz, {} channels",
                    mix.sample_rate().0,
                    mix.channels()
                );
                mix
            }
        };

        if supported.sample_format() != cpal::SampleFormat::F32 {
            return Err(Error::not_supported(format!(
                "device sample format {} is not f32",
                supported.sample_format()
            )));
        }

        let mut config: cpal::StreamConfig = supported.config();
        config.buffer_size = match supported.buffer_size() {
            cpal::SupportedBufferSize::Range { min, max } => {
                cpal::BufferSize::Fixed(requested.buffer_frames.clamp(*min, *max))
            }
            cpal::SupportedBufferSize::Unknown => cpal::BufferSize::Default,
        };

        let negotiated = NegotiatedFormat {
            sample_rate: config.sample_rate.0,
            channels: u32::from(config.channels),
            format: SampleFormat::Float32,
            buffer_frames: match config.buffer_size {
                cpal::BufferSize::Fixed(frames) => frames,
                cpal::BufferSize::Default => requested.buffer_frames,
            },
        };

        Ok((config, negotiated))
    }

    /// Builds and starts the cpal stream around the shared callback.
    fn build_stream(&mut self) -> Result<()> {
        let device = self
            .device
            .as_ref()
            .ok_or_else(|| Error::invalid_state("output not open"))?;
        let negotiated = self
            .negotiated
            .ok_or_else(|| Error::invalid_state("output not open"))?;
        let shared = Arc::clone(
            self.shared
                .as_ref()
                .ok_or_else(|| Error::invalid_state("output not open"))?,
        );

        let channels = negotiated.channels as usize;
        let mut config: cpal::StreamConfig = cpal::StreamConfig {
            channels: negotiated.channels as u16,
            sample_rate: cpal::SampleRate(negotiated.sample_rate),
            buffer_size: cpal::BufferSize::Fixed(negotiated.buffer_frames),
        };
        // Some backends refuse fixed sizes they reported as supported;
        // retry with the default size before giving up.
        let stream = match device.build_output_stream(
            &config,
            Self::data_callback(Arc::clone(&shared), channels),
            |err| error!("audio stream error: {err}"),
            None,
        ) {
            Ok(stream) => stream,
            Err(cpal::BuildStreamError::StreamConfigNotSupported) => {
                config.buffer_size = cpal::BufferSize::Default;
                device.build_output_stream(
                    &config,
                    Self::data_callback(shared, channels),
                    |err| error!("audio stream error: {err}"),
                    None,
                )?
            }
            Err(e) => return Err(e.into()),
        };

        stream.play()?;
        self.stream = Some(StreamHandle(stream));
        Ok(())
    }

    /// The closure handed to cpal: pull from the engine, apply volume.
    fn data_callback(
        shared: Arc<Shared>,
        channels: usize,
    ) -> impl FnMut(&mut [f32], &cpal::OutputCallbackInfo) + Send + 'static {
        move |output: &mut [f32], _info| {
            let frames = output.len() / channels.max(1);
            match shared.callback.try_lock() {
                Ok(mut callback) => callback(output, frames),
                // Contended only while the control thread swaps streams;
                // a silent buffer is the correct degradation.
                Err(_) => output.fill(0.0),
            }

            let volume = f32::from_bits(shared.volume_bits.load(Ordering::Relaxed));
            if (volume - 1.0).abs() > f32::EPSILON {
                for sample in output.iter_mut() {
                    *sample *= volume;
                }
            }
        }
    }
}

impl Default for CpalOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioOutput for CpalOutput {
    fn enumerate_devices(&self) -> Result<Vec<AudioDeviceInfo>> {
        let host = cpal::default_host();
        let default_name = host
            .default_output_device()
            .and_then(|device| device.name().ok());

        let mut result = Vec::new();
        for device in host.output_devices()? {
            let Ok(name) = device.name() else {
                continue;
            };
            let default_config = match device.default_output_config() {
                Ok(config) => config,
                Err(_) => continue,
            };
            let max_channels = device
                .supported_output_configs()
                .map(|configs| {
                    configs
                        .map(|range| u32::from(range.channels()))
                        .max()
                        .unwrap_or(0)
                })
                .unwrap_or(0);

            result.push(AudioDeviceInfo {
                id: name.clone(),
                is_default: default_name.as_deref() == Some(name.as_str()),
                name,
                max_channels,
                default_sample_rate: default_config.sample_rate().0,
            });
        }

        result.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(result)
    }

    fn open(&mut self, config: AudioOutputConfig) -> Result<NegotiatedFormat> {
        if self.device.is_some() {
            return Err(Error::already_initialized("output already open"));
        }

        let device = Self::find_device(config.device_id.as_deref())?;
        let (_, negotiated) = Self::negotiate(&device, &config)?;

        info!(
            "audio output: {} at {:.1} kHz, {} channels, {} frames",
            device.name().as_deref().unwrap_or("UNKNOWN"),
            negotiated.sample_rate.to_f32_lossy() / 1000.0,
            negotiated.channels,
            negotiated.buffer_frames,
        );

        self.shared = Some(Arc::new(Shared {
            callback: Mutex::new(config.callback),
            volume_bits: AtomicU32::new(1.0_f32.to_bits()),
        }));
        self.device = Some(device);
        self.negotiated = Some(negotiated);

        Ok(negotiated)
    }

    fn start(&mut self) -> Result<()> {
        if self.device.is_none() {
            return Err(Error::invalid_state("output not open"));
        }
        if self.running {
            return Ok(());
        }

        self.build_stream()?;
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if self.device.is_none() {
            return Err(Error::invalid_state("output not open"));
        }

        // Dropping the stream stops the device and joins its callback
        // thread; after this point no callback is in flight.
        self.stream = None;
        self.running = false;
        Ok(())
    }

    fn close(&mut self) {
        self.stream = None;
        self.running = false;
        self.negotiated = None;
        self.shared = None;
        self.device = None;
    }

    fn latency_ms(&self) -> u32 {
        match self.negotiated {
            Some(negotiated) if negotiated.sample_rate > 0 => {
                negotiated.buffer_frames * 1000 / negotiated.sample_rate
            }
            _ => 0,
        }
    }

    fn set_volume(&mut self, volume: f32) -> Result<()> {
        if !(0.0..=1.0).contains(&volume) {
            return Err(Error::invalid_parameter(format!(
                "volume {volume} outside 0.0..=1.0"
            )));
        }
        if let Some(shared) = &self.shared {
            shared.volume_bits.store(volume.to_bits(), Ordering::Relaxed);
        }
        Ok(())
    }

    fn get_volume(&self) -> f32 {
        self.shared
            .as_ref()
            .map_or(1.0, |shared| {
                f32::from_bits(shared.volume_bits.load(Ordering::Relaxed))
            })
    }
}
