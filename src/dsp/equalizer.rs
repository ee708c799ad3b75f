//! Ten-band graphic equalizer.
//!
//! Peaking biquads at the ISO octave centers from 31.25 Hz to 16 kHz,
//! Q = 1.0, one gain parameter per band in ±12 dB. Coefficients follow
//! the Robert Bristow-Johnson cookbook peaking formula with
//! `A = 10^(gain/40)`; per-channel state vectors keep the bands free of
//! channel cross-talk. Mono and stereo only: more channels return
//! `NotSupported`.

use crate::{
    audio::AudioBuffer,
    error::{Error, Result},
};

use super::{DspConfig, DspParameter, DspProcessor};

/// Number of equalizer bands.
pub const NUM_BANDS: usize = 10;

/// Band center frequencies in Hz.
pub const BAND_FREQUENCIES: [f32; NUM_BANDS] = [
    31.25, 62.5, 125.0, 250.0, 500.0, 1_000.0, 2_000.0, 4_000.0, 8_000.0, 16_000.0,
];

/// Q factor shared by all peaking bands.
pub const Q_FACTOR: f32 = 1.0;

/// Band gain limits in dB.
pub const GAIN_RANGE_DB: (f32, f32) = (-12.0, 12.0);

/// Maximum channels the equalizer processes.
const MAX_CHANNELS: u32 = 2;

/// Direct-form-I biquad with per-channel state.
///
/// `H(z) = (b0 + b1 z^-1 + b2 z^-2) / (1 + a1 z^-1 + a2 z^-2)`
#[derive(Clone, Debug)]
struct Biquad {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
    /// Input history per channel.
    x1: [f32; 2],
    x2: [f32; 2],
    /// Output history per channel.
    y1: [f32; 2],
    y2: [f32; 2],
}

impl Biquad {
    fn identity() -> Self {
        Self {
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
            x1: [0.0; 2],
            x2: [0.0; 2],
            y1: [0.0; 2],
            y2: [0.0; 2],
        }
    }

    /// Designs an RBJ peaking EQ at `freq` with `gain_db` and `q`.
    fn design_peaking(&mut self, sample_rate: f32, freq: f32, gain_db: f32, q: f32) {
        let a = 10.0_f32.powf(gain_db / 40.0);
        let omega = 2.0 * std::f32::consts::PI * freq / sample_rate;
        let sin_omega = omega.sin();
        let cos_omega = omega.cos();
        let alpha = sin_omega / (2.0 * q);

        let b0 = 1.0 + alpha * a;
        let b1 = -2.0 * cos_omega;
        let b2 = 1.0 - alpha * a;
        let a0 = 1.0 + alpha / a;
        let a1 = -2.0 * cos_omega;
        let a2 = 1.0 - alpha / a;

        self.b0 = b0 / a0;
        self.b1 = b1 / a0;
        self.b2 = b2 / a0;
        self.a1 = a1 / a0;
        self.a2 = a2 / a0;
    }

    /// Processes one sample on `channel`.
    #[inline]
    fn process(&mut self, input: f32, channel: usize) -> f32 {
        let output = self.b0 * input + self.b1 * self.x1[channel] + self.b2 * self.x2[channel]
            - self.a1 * self.y1[channel]
            - self.a2 * self.y2[channel];

        self.x2[channel] = self.x1[channel];
        self.x1[channel] = input;
        self.y2[channel] = self.y1[channel];
        self.y1[channel] = output;

        output
    }

    fn reset(&mut self) {
        self.x1 = [0.0; 2];
        self.x2 = [0.0; 2];
        self.y1 = [0.0; 2];
        self.y2 = [0.0; 2];
    }
}

/// Ten-band graphic equalizer stage.
pub struct Equalizer {
    sample_rate: u32,
    channels: u32,
    bypassed: bool,
    gains_db: [f32; NUM_BANDS],
    filters: Vec<Biquad>,
}

impl Equalizer {
    /// Creates a flat (all bands 0 dB) equalizer.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sample_rate: 0,
            channels: 0,
            bypassed: false,
            gains_db: [0.0; NUM_BANDS],
            filters: vec![Biquad::identity(); NUM_BANDS],
        }
    }

    fn update_filter(&mut self, band: usize) {
        if self.sample_rate == 0 {
            return;
        }
        #[expect(clippy::cast_precision_loss)]
        self.filters[band].design_peaking(
            self.sample_rate as f32,
            BAND_FREQUENCIES[band],
            self.gains_db[band],
            Q_FACTOR,
        );
    }

    fn update_filters(&mut self) {
        for band in 0..NUM_BANDS {
            self.update_filter(band);
        }
    }

    /// Formats band names like `band_500hz` / `band_2khz`.
    #[expect(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn band_name(band: usize) -> (String, String) {
        let freq = BAND_FREQUENCIES[band];
        if freq < 1_000.0 {
            (format!("band_{}hz", freq as u32), format!("{} Hz", freq as u32))
        } else {
            (
                format!("band_{}khz", (freq / 1_000.0) as u32),
                format!("{:.1} kHz", freq / 1_000.0),
            )
        }
    }
}

impl Default for Equalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl DspProcessor for Equalizer {
    fn name(&self) -> &'static str {
        "equalizer"
    }

    fn initialize(&mut self, config: &DspConfig) -> Result<()> {
        if config.channels == 0 || config.channels > MAX_CHANNELS {
            return Err(Error::not_supported(format!(
                "equalizer supports 1 or 2 channels, got {}",
                config.channels
            )));
        }

        self.sample_rate = config.sample_rate;
        self.channels = config.channels;
        self.update_filters();
        self.reset();

        Ok(())
    }

    fn process(&mut self, buffer: &mut AudioBuffer) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(Error::not_initialized("equalizer"));
        }

        let channels = self.channels as usize;
        let samples = buffer.samples_mut();

        for frame in samples.chunks_exact_mut(channels) {
            for (ch, sample) in frame.iter_mut().enumerate() {
                let mut value = *sample;
                // Bands run in series; each contributes its own peak.
                for filter in &mut self.filters {
                    value = filter.process(value, ch);
                }
                *sample = value;
            }
        }

        Ok(())
    }

    fn latency_samples(&self) -> u32 {
        // Biquads have negligible group delay at these Q values.
        0
    }

    fn reset(&mut self) {
        for filter in &mut self.filters {
            filter.reset();
        }
    }

    fn set_bypass(&mut self, bypass: bool) {
        self.bypassed = bypass;
    }

    fn is_bypassed(&self) -> bool {
        self.bypassed
    }

    fn param_count(&self) -> usize {
        NUM_BANDS
    }

    fn param_info(&self, index: usize) -> Result<DspParameter> {
        if index >= NUM_BANDS {
            return Err(Error::invalid_parameter(format!(
                "equalizer has {NUM_BANDS} bands, got index {index}"
            )));
        }

        let (name, label) = Self::band_name(index);
        Ok(DspParameter {
            name,
            label,
            min_value: GAIN_RANGE_DB.0,
            max_value: GAIN_RANGE_DB.1,
            default_value: 0.0,
            current_value: self.gains_db[index],
            unit: "dB",
        })
    }

    fn get_param(&self, index: usize) -> f32 {
        self.gains_db.get(index).copied().unwrap_or(0.0)
    }

    fn set_param(&mut self, index: usize, value: f32) -> Result<()> {
        if index >= NUM_BANDS {
            return Err(Error::invalid_parameter(format!(
                "equalizer has {NUM_BANDS} bands, got index {index}"
            )));
        }

        self.gains_db[index] = value.clamp(GAIN_RANGE_DB.0, GAIN_RANGE_DB.1);
        self.update_filter(index);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioBuffer;

    fn config(channels: u32) -> DspConfig {
        DspConfig {
            sample_rate: 48_000,
            channels,
            format: crate::audio::SampleFormat::Float32,
            max_buffer_frames: 4096,
        }
    }

    fn sine_buffer(frames: usize, channels: u32, freq: f32) -> AudioBuffer {
        let mut buffer = AudioBuffer::with_capacity(frames, channels, 48_000);
        buffer.frames = frames;
        for i in 0..frames {
            let value = (2.0 * std::f32::consts::PI * freq * i as f32 / 48_000.0).sin() * 0.5;
            for ch in 0..channels as usize {
                buffer.data[i * channels as usize + ch] = value;
            }
        }
        buffer
    }

    fn rms(samples: &[f32]) -> f32 {
        (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
    }

    #[test]
    fn flat_bands_pass_through() {
        let mut eq = Equalizer::new();
        eq.initialize(&config(2)).unwrap();

        let mut buffer = sine_buffer(2048, 2, 1000.0);
        let original = buffer.data.clone();
        eq.process(&mut buffer).unwrap();

        for (processed, original) in buffer.samples().iter().zip(&original) {
            assert!((processed - original).abs() <= 1e-6);
        }
    }

    #[test]
    fn boost_raises_band_level() {
        let mut eq = Equalizer::new();
        eq.initialize(&config(1)).unwrap();
        eq.set_param(5, 12.0).unwrap(); // 1 kHz

        let mut boosted = sine_buffer(9600, 1, 1000.0);
        let reference = boosted.data.clone();
        eq.process(&mut boosted).unwrap();

        // Skip the filter settle-in, then compare levels.
        let gain_db = 20.0
            * (rms(&boosted.samples()[960..]) / rms(&reference[960..])).log10();
        assert!(
            (gain_db - 12.0).abs() < 1.0,
            "expected ~12 dB boost, got {gain_db:.2} dB"
        );
    }

    #[test]
    fn boost_leaves_distant_bands_alone() {
        let mut eq = Equalizer::new();
        eq.initialize(&config(1)).unwrap();
        eq.set_param(5, 12.0).unwrap(); // 1 kHz

        // A 62.5 Hz tone is four octaves below the boosted band.
        let mut low = sine_buffer(9600, 1, 62.5);
        let reference = low.data.clone();
        eq.process(&mut low).unwrap();

        let gain_db = 20.0 * (rms(&low.samples()[960..]) / rms(&reference[960..])).log10();
        assert!(gain_db.abs() < 1.0, "distant band moved {gain_db:.2} dB");
    }

    #[test]
    fn no_channel_cross_talk() {
        let mut eq = Equalizer::new();
        eq.initialize(&config(2)).unwrap();
        eq.set_param(5, 12.0).unwrap();

        // Left carries a tone, right is digital silence.
        let mut buffer = AudioBuffer::with_capacity(4096, 2, 48_000);
        buffer.frames = 4096;
        for i in 0..4096 {
            buffer.data[i * 2] =
                (2.0 * std::f32::consts::PI * 1000.0 * i as f32 / 48_000.0).sin();
        }
        eq.process(&mut buffer).unwrap();

        for frame in 0..4096 {
            assert_eq!(buffer.data[frame * 2 + 1], 0.0);
        }
    }

    #[test]
    fn more_than_two_channels_not_supported() {
        let mut eq = Equalizer::new();
        let err = eq.initialize(&config(6)).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::NotSupported);
    }

    #[test]
    fn gain_is_clamped_to_range() {
        let mut eq = Equalizer::new();
        eq.initialize(&config(2)).unwrap();
        eq.set_param(0, 40.0).unwrap();
        assert_eq!(eq.get_param(0), 12.0);
        eq.set_param(0, -40.0).unwrap();
        assert_eq!(eq.get_param(0), -12.0);
        assert!(eq.set_param(NUM_BANDS, 0.0).is_err());
    }

    #[test]
    fn parameter_table_is_complete() {
        let eq = Equalizer::new();
        assert_eq!(eq.param_count(), NUM_BANDS);

        let info = eq.param_info(5).unwrap();
        assert_eq!(info.name, "band_1khz");
        assert_eq!(info.label, "1.0 kHz");
        assert_eq!(info.unit, "dB");
        assert_eq!(info.min_value, -12.0);
        assert_eq!(info.max_value, 12.0);

        let info = eq.param_info(2).unwrap();
        assert_eq!(info.name, "band_125hz");
        assert!(eq.param_info(NUM_BANDS).is_err());
    }
}
