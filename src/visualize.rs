//! Visualization engine: waveform, spectrum and VU data products.
//!
//! Three independently-locked products are fed from the audio callback
//! and read by the UI at its own pace (~60 Hz):
//!
//! * **Waveform** — a mono-downmixed ring covering `waveform_time_span`
//!   seconds; reads reduce the ring to `(min, max)` pairs per pixel.
//! * **Spectrum** — Hann-windowed FFT of the current block mapped onto
//!   log-spaced bars with exponential smoothing and a -80 dB floor.
//! * **VU meters** — stereo peak (with dB/s decay) and sliding-window
//!   RMS, in linear and dB.
//!
//! The audio-thread writer takes each product mutex with `try_lock` and
//! drops the product on contention, so the callback never blocks on a
//! reader. Readers block (briefly) and always observe the latest
//! committed snapshot.

use std::sync::{Arc, Mutex};

use rustfft::{num_complex::Complex, Fft, FftPlanner};

use crate::{
    error::{Error, Result},
    util::{ratio_to_db, ToF32, DB_FLOOR},
};

/// Tuning knobs for all three products.
#[derive(Clone, Debug)]
pub struct VisualizationConfig {
    /// Output pixels per waveform read.
    pub waveform_width: usize,
    /// Seconds of audio the waveform ring covers.
    pub waveform_time_span: f32,
    /// FFT length; rounded up to the next power of two.
    pub fft_size: usize,
    /// Number of log-spaced spectrum bars.
    pub spectrum_bars: usize,
    /// Lower edge of the spectrum in Hz.
    pub spectrum_min_freq: f32,
    /// Upper edge of the spectrum in Hz.
    pub spectrum_max_freq: f32,
    /// Exponential smoothing factor in `[0, 1]`; higher is smoother.
    pub spectrum_smoothing: f32,
    /// Peak decay in dB/s between blocks.
    pub vu_peak_decay_rate: f32,
    /// RMS window length in milliseconds.
    pub vu_rms_window_ms: f32,
}

impl Default for VisualizationConfig {
    fn default() -> Self {
        Self {
            waveform_width: 800,
            waveform_time_span: 5.0,
            fft_size: 2048,
            spectrum_bars: 30,
            spectrum_min_freq: 20.0,
            spectrum_max_freq: 20_000.0,
            spectrum_smoothing: 0.75,
            vu_peak_decay_rate: 10.0,
            vu_rms_window_ms: 100.0,
        }
    }
}

/// One waveform read: `(min, max)` per pixel.
#[derive(Clone, Debug, Default)]
pub struct WaveformData {
    /// Per-pixel minima.
    pub min_values: Vec<f32>,
    /// Per-pixel maxima.
    pub max_values: Vec<f32>,
    /// Rate of the audio currently feeding the ring.
    pub sample_rate: u32,
    /// Seconds the ring covers.
    pub time_span_seconds: f32,
}

/// One spectrum read.
#[derive(Clone, Debug, Default)]
pub struct SpectrumData {
    /// Smoothed bar magnitudes in dB, floored at -80.
    pub magnitudes: Vec<f32>,
    /// Bar center frequencies in Hz.
    pub frequencies: Vec<f32>,
    /// FFT length behind the bars.
    pub fft_size: usize,
    /// Rate of the audio feeding the FFT.
    pub sample_rate: u32,
}

/// One VU meter read (stereo).
#[derive(Copy, Clone, Debug)]
pub struct VuMeterData {
    /// Linear peak, left.
    pub peak_left: f32,
    /// Linear peak, right.
    pub peak_right: f32,
    /// Linear RMS over the sliding window, left.
    pub rms_left: f32,
    /// Linear RMS over the sliding window, right.
    pub rms_right: f32,
    /// Peak in dB, left.
    pub peak_db_left: f32,
    /// Peak in dB, right.
    pub peak_db_right: f32,
    /// RMS in dB, left.
    pub rms_db_left: f32,
    /// RMS in dB, right.
    pub rms_db_right: f32,
}

impl Default for VuMeterData {
    fn default() -> Self {
        Self {
            peak_left: 0.0,
            peak_right: 0.0,
            rms_left: 0.0,
            rms_right: 0.0,
            peak_db_left: DB_FLOOR,
            peak_db_right: DB_FLOOR,
            rms_db_left: DB_FLOOR,
            rms_db_right: DB_FLOOR,
        }
    }
}

struct WaveformState {
    ring: Vec<f32>,
    write_pos: usize,
    sample_rate: u32,
}

struct SpectrumState {
    input: Vec<f32>,
    window: Vec<f32>,
    scratch: Vec<Complex<f32>>,
    bars: Vec<f32>,
    smoothed: Vec<f32>,
    fft: Arc<dyn Fft<f32>>,
    sample_rate: u32,
}

struct VuState {
    rms_left: Vec<f32>,
    rms_right: Vec<f32>,
    rms_pos: usize,
    data: VuMeterData,
}

/// Lock-per-product visualization engine.
pub struct VisualizationEngine {
    config: VisualizationConfig,
    waveform: Mutex<WaveformState>,
    spectrum: Mutex<SpectrumState>,
    vu: Mutex<VuState>,
}

impl std::fmt::Debug for VisualizationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VisualizationEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl VisualizationEngine {
    /// Creates the engine for audio at up to `max_sample_rate` Hz.
    ///
    /// The waveform ring holds `ceil(max_sample_rate * time_span)` mono
    /// samples, so rates above 48 kHz are fully covered.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` for an empty time span, zero bars or
    /// zero width.
    pub fn new(config: VisualizationConfig, max_sample_rate: u32) -> Result<Self> {
        if config.waveform_width == 0
            || config.spectrum_bars == 0
            || config.waveform_time_span <= 0.0
            || max_sample_rate == 0
        {
            return Err(Error::invalid_parameter("empty visualization dimensions"));
        }

        let mut config = config;
        config.fft_size = config.fft_size.max(2).next_power_of_two();
        config.spectrum_smoothing = config.spectrum_smoothing.clamp(0.0, 1.0);

        let ring_len = (max_sample_rate.to_f32_lossy() * config.waveform_time_span).ceil();
        #[expect(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let ring_len = ring_len as usize;

        let rms_len = (max_sample_rate.to_f32_lossy() * config.vu_rms_window_ms / 1000.0).ceil();
        #[expect(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let rms_len = (rms_len as usize).max(1);

        let fft = FftPlanner::<f32>::new().plan_fft_forward(config.fft_size);
        #[expect(clippy::cast_precision_loss)]
        let hann: Vec<f32> = (0..config.fft_size)
            .map(|i| {
                0.5 * (1.0
                    - (2.0 * std::f32::consts::PI * i as f32 / (config.fft_size - 1) as f32)
                        .cos())
            })
            .collect();

        Ok(Self {
            waveform: Mutex::new(WaveformState {
                ring: vec![0.0; ring_len],
                write_pos: 0,
                sample_rate: 0,
            }),
            spectrum: Mutex::new(SpectrumState {
                input: vec![0.0; config.fft_size],
                window: hann,
                scratch: vec![Complex::default(); config.fft_size],
                bars: vec![DB_FLOOR; config.spectrum_bars],
                smoothed: vec![DB_FLOOR; config.spectrum_bars],
                fft,
                sample_rate: 0,
            }),
            vu: Mutex::new(VuState {
                rms_left: vec![0.0; rms_len],
                rms_right: vec![0.0; rms_len],
                rms_pos: 0,
                data: VuMeterData::default(),
            }),
            config,
        })
    }

    /// Center frequency of bar `index` on the log-spaced scale.
    fn bar_frequency(&self, index: usize) -> f32 {
        let bars = self.config.spectrum_bars;
        let log_min = self.config.spectrum_min_freq.log10();
        let log_max = self.config.spectrum_max_freq.log10();
        #[expect(clippy::cast_precision_loss)]
        let t = if bars > 1 {
            index as f32 / (bars - 1) as f32
        } else {
            0.0
        };
        10.0_f32.powf(log_min + t * (log_max - log_min))
    }

    /// Feeds one block of interleaved audio from the callback.
    ///
    /// Each product mutex is taken with `try_lock`, one at a time; a
    /// contended product skips this block.
    pub fn process_audio(&self, samples: &[f32], frames: usize, channels: u32, sample_rate: u32) {
        if frames == 0 || channels == 0 || sample_rate == 0 {
            return;
        }
        let channels = channels as usize;
        let samples = &samples[..(frames * channels).min(samples.len())];

        #[expect(clippy::cast_precision_loss)]
        let mono_scale = 1.0 / channels as f32;

        if let Ok(mut waveform) = self.waveform.try_lock() {
            waveform.sample_rate = sample_rate;
            let len = waveform.ring.len();
            for frame in samples.chunks_exact(channels) {
                let mono: f32 = frame.iter().sum::<f32>() * mono_scale;
                let pos = waveform.write_pos;
                waveform.ring[pos] = mono;
                waveform.write_pos = (pos + 1) % len;
            }
        }

        if let Ok(mut spectrum) = self.spectrum.try_lock() {
            spectrum.sample_rate = sample_rate;
            let spectrum = &mut *spectrum;
            let fft_size = self.config.fft_size;

            // First fft_size samples of the block, zero-padded if short.
            for (i, slot) in spectrum.input.iter_mut().enumerate() {
                *slot = if i < frames {
                    samples[i * channels..(i + 1) * channels].iter().sum::<f32>() * mono_scale
                } else {
                    0.0
                };
            }

            for (i, value) in spectrum.scratch.iter_mut().enumerate() {
                *value = Complex::new(spectrum.input[i] * spectrum.window[i], 0.0);
            }
            spectrum.fft.process(&mut spectrum.scratch);

            // Map bins to bars: the bin closest to each bar's center.
            let bins = fft_size / 2;
            let bin_hz = sample_rate.to_f32_lossy() / fft_size.to_f32_lossy();
            #[expect(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            for bar in 0..self.config.spectrum_bars {
                let center = self.bar_frequency(bar);
                let bin = ((center / bin_hz).round() as usize).min(bins.saturating_sub(1));
                let magnitude = spectrum.scratch[bin].norm() / fft_size.to_f32_lossy();
                spectrum.bars[bar] = ratio_to_db(magnitude).max(DB_FLOOR);
            }

            let alpha = self.config.spectrum_smoothing;
            for (smoothed, instant) in spectrum.smoothed.iter_mut().zip(&spectrum.bars) {
                *smoothed = alpha * *smoothed + (1.0 - alpha) * instant;
            }
        }

        if let Ok(mut vu) = self.vu.try_lock() {
            let vu = &mut *vu;
            let mut peak_left = 0.0_f32;
            let mut peak_right = 0.0_f32;

            for frame in samples.chunks_exact(channels) {
                let left = frame[0];
                let right = if channels > 1 { frame[1] } else { left };

                peak_left = peak_left.max(left.abs());
                peak_right = peak_right.max(right.abs());

                let pos = vu.rms_pos;
                vu.rms_left[pos] = left * left;
                vu.rms_right[pos] = right * right;
                vu.rms_pos = (pos + 1) % vu.rms_left.len();
            }

            #[expect(clippy::cast_precision_loss)]
            let window = vu.rms_left.len() as f32;
            let rms_left = (vu.rms_left.iter().sum::<f32>() / window).sqrt();
            let rms_right = (vu.rms_right.iter().sum::<f32>() / window).sqrt();

            // Peaks refresh upward immediately and decay between blocks.
            let decay_db =
                self.config.vu_peak_decay_rate * frames.to_f32_lossy() / sample_rate.to_f32_lossy();
            let decay = crate::util::db_to_ratio(-decay_db);
            vu.data.peak_left = peak_left.max(vu.data.peak_left * decay);
            vu.data.peak_right = peak_right.max(vu.data.peak_right * decay);
            vu.data.rms_left = rms_left;
            vu.data.rms_right = rms_right;

            vu.data.peak_db_left = ratio_to_db(vu.data.peak_left);
            vu.data.peak_db_right = ratio_to_db(vu.data.peak_right);
            vu.data.rms_db_left = ratio_to_db(rms_left);
            vu.data.rms_db_right = ratio_to_db(rms_right);
        }
    }

    /// Reduces the waveform ring to `(min, max)` pairs per pixel.
    #[must_use]
    pub fn waveform(&self) -> WaveformData {
        let Ok(waveform) = self.waveform.lock() else {
            return WaveformData::default();
        };

        let width = self.config.waveform_width;
        let ring = &waveform.ring;
        let samples_per_pixel = (ring.len() / width).max(1);

        let mut data = WaveformData {
            min_values: vec![0.0; width],
            max_values: vec![0.0; width],
            sample_rate: waveform.sample_rate,
            time_span_seconds: self.config.waveform_time_span,
        };

        for pixel in 0..width {
            let mut min_value = f32::MAX;
            let mut max_value = f32::MIN;
            let start = pixel * samples_per_pixel;
            for i in start..(start + samples_per_pixel).min(ring.len()) {
                // Oldest-first: offset from the write position.
                let sample = ring[(waveform.write_pos + i) % ring.len()];
                min_value = min_value.min(sample);
                max_value = max_value.max(sample);
            }
            data.min_values[pixel] = min_value.min(max_value);
            data.max_values[pixel] = max_value.max(min_value);
        }

        data
    }

    /// The latest smoothed spectrum bars.
    #[must_use]
    pub fn spectrum(&self) -> SpectrumData {
        let Ok(spectrum) = self.spectrum.lock() else {
            return SpectrumData::default();
        };

        SpectrumData {
            magnitudes: spectrum.smoothed.clone(),
            frequencies: (0..self.config.spectrum_bars)
                .map(|bar| self.bar_frequency(bar))
                .collect(),
            fft_size: self.config.fft_size,
            sample_rate: spectrum.sample_rate,
        }
    }

    /// The latest VU meter values.
    #[must_use]
    pub fn vu_meters(&self) -> VuMeterData {
        self.vu.lock().map(|vu| vu.data).unwrap_or_default()
    }

    /// The effective configuration (FFT size rounded, smoothing clamped).
    #[must_use]
    pub fn config(&self) -> &VisualizationConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> VisualizationEngine {
        VisualizationEngine::new(VisualizationConfig::default(), 48_000).unwrap()
    }

    fn sine_block(frames: usize, freq: f32, rate: f32, amplitude: f32) -> Vec<f32> {
        let mut samples = vec![0.0; frames * 2];
        for i in 0..frames {
            let value =
                (2.0 * std::f32::consts::PI * freq * i as f32 / rate).sin() * amplitude;
            samples[i * 2] = value;
            samples[i * 2 + 1] = value;
        }
        samples
    }

    #[test]
    fn fft_size_rounds_to_power_of_two() {
        let engine =
            VisualizationEngine::new(
                VisualizationConfig {
                    fft_size: 1000,
                    ..VisualizationConfig::default()
                },
                48_000,
            )
            .unwrap();
        assert_eq!(engine.config().fft_size, 1024);
    }

    #[test]
    fn spectrum_peaks_at_the_tone() {
        let engine = engine();
        let block = sine_block(2048, 1_000.0, 48_000.0, 0.8);

        // Several blocks drive the smoothed bars toward the instant value.
        for _ in 0..32 {
            engine.process_audio(&block, 2048, 2, 48_000);
        }

        let spectrum = engine.spectrum();
        let peak_bar = spectrum
            .magnitudes
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .unwrap()
            .0;

        // The winning bar's center must be the one closest to 1 kHz.
        let closest = spectrum
            .frequencies
            .iter()
            .enumerate()
            .min_by(|a, b| {
                (a.1 - 1_000.0)
                    .abs()
                    .partial_cmp(&(b.1 - 1_000.0).abs())
                    .unwrap()
            })
            .unwrap()
            .0;
        assert_eq!(peak_bar, closest);
    }

    #[test]
    fn vu_tracks_peak_and_rms() {
        let engine = engine();
        let block = sine_block(4800, 440.0, 48_000.0, 0.5);
        // Fill the whole RMS window.
        engine.process_audio(&block, 4800, 2, 48_000);

        let vu = engine.vu_meters();
        assert!((vu.peak_left - 0.5).abs() < 0.01, "peak {}", vu.peak_left);
        // Sine RMS = amplitude / sqrt(2).
        let expected_rms = 0.5 / 2.0_f32.sqrt();
        assert!(
            (vu.rms_left - expected_rms).abs() < 0.02,
            "rms {}",
            vu.rms_left
        );
        assert!(vu.peak_db_left < 0.0 && vu.peak_db_left > -7.0);
    }

    #[test]
    fn peak_decays_between_blocks() {
        let engine = engine();
        let loud = sine_block(4800, 440.0, 48_000.0, 0.9);
        engine.process_audio(&loud, 4800, 2, 48_000);
        let peak_before = engine.vu_meters().peak_left;

        let silence = vec![0.0; 4800 * 2];
        for _ in 0..10 {
            engine.process_audio(&silence, 4800, 2, 48_000);
        }
        let peak_after = engine.vu_meters().peak_left;
        assert!(peak_after < peak_before, "{peak_after} !< {peak_before}");
        assert!(peak_after > 0.0);
    }

    #[test]
    fn waveform_reflects_signal_extremes() {
        let engine = engine();
        let block = sine_block(48_000, 100.0, 48_000.0, 0.7);
        engine.process_audio(&block, 48_000, 2, 48_000);

        let waveform = engine.waveform();
        assert_eq!(waveform.min_values.len(), 800);
        let global_max = waveform.max_values.iter().fold(f32::MIN, |a, &b| a.max(b));
        let global_min = waveform.min_values.iter().fold(f32::MAX, |a, &b| a.min(b));
        assert!(global_max > 0.65 && global_max <= 0.71);
        assert!(global_min < -0.65 && global_min >= -0.71);
    }

    #[test]
    fn silence_reads_at_the_floor() {
        let engine = engine();
        let silence = vec![0.0; 2048 * 2];
        engine.process_audio(&silence, 2048, 2, 48_000);

        let spectrum = engine.spectrum();
        assert!(spectrum.magnitudes.iter().all(|&db| db <= DB_FLOOR + 25.0));

        let vu = engine.vu_meters();
        assert_eq!(vu.rms_db_left, DB_FLOOR);
    }

    #[test]
    fn invalid_dimensions_are_rejected() {
        let err = VisualizationEngine::new(
            VisualizationConfig {
                waveform_width: 0,
                ..VisualizationConfig::default()
            },
            48_000,
        )
        .unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::InvalidParameter);
    }
}
