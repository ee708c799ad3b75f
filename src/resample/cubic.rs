//! Cubic (Catmull-Rom) interpolation converter.
//!
//! Four-point Hermite interpolation over a sliding window, preceded by a
//! Kaiser-windowed FIR low-pass when downsampling. The FIR runs at the
//! input rate with 101 taps and β = 6; its cutoff follows
//! `min(0.45, 0.95 * out_hz / (2 * in_hz))` so the stopband lands below
//! the output Nyquist frequency.

use crate::error::Result;

use super::{alias_cutoff, check_rates, kaiser, sinc, SampleRateConverter};

/// History window in frames: the four-point interpolation support.
const HISTORY_FRAMES: usize = 4;

/// Interpolation support to the right of the read position.
const RIGHT_SUPPORT: usize = 2;

/// Anti-alias FIR length.
const FILTER_TAPS: usize = 101;

/// Kaiser shape parameter for the anti-alias FIR.
const FILTER_BETA: f64 = 6.0;

/// Kaiser-windowed FIR low-pass operating on interleaved frames.
///
/// Per-channel circular delay lines keep filter state continuous across
/// `process` calls.
struct AntiAliasFilter {
    coefficients: Vec<f32>,
    delay: Vec<f32>,
    index: usize,
    channels: usize,
}

impl AntiAliasFilter {
    /// Designs the low-pass for `cutoff` (fraction of the input rate).
    fn new(cutoff: f64, channels: usize) -> Self {
        let mut coefficients = vec![0.0_f32; FILTER_TAPS];
        let m = (FILTER_TAPS - 1) as f64 / 2.0;
        #[expect(clippy::cast_possible_truncation)]
        for (i, coefficient) in coefficients.iter_mut().enumerate() {
            let ideal = 2.0 * cutoff * sinc(2.0 * cutoff * (i as f64 - m));
            *coefficient = (ideal * kaiser(i, FILTER_TAPS, FILTER_BETA)) as f32;
        }

        Self {
            coefficients,
            delay: vec![0.0; FILTER_TAPS * channels],
            index: 0,
            channels,
        }
    }

    /// Filters `frames` interleaved frames of `input` into `output`.
    fn process(&mut self, input: &[f32], output: &mut [f32], frames: usize) {
        for frame in 0..frames {
            for ch in 0..self.channels {
                self.delay[self.index * self.channels + ch] =
                    input[frame * self.channels + ch];
            }

            for ch in 0..self.channels {
                let mut sum = 0.0;
                for (i, coefficient) in self.coefficients.iter().enumerate() {
                    let tap = (self.index + FILTER_TAPS - i) % FILTER_TAPS;
                    sum += self.delay[tap * self.channels + ch] * coefficient;
                }
                output[frame * self.channels + ch] = sum;
            }

            self.index = (self.index + 1) % FILTER_TAPS;
        }
    }

    fn reset(&mut self) {
        self.delay.fill(0.0);
        self.index = 0;
    }

    /// Group delay of the symmetric FIR in samples.
    fn delay_samples() -> u32 {
        (FILTER_TAPS as u32 - 1) / 2
    }
}

/// Catmull-Rom cubic interpolation of `y1..y2` at fraction `x`.
fn cubic_interpolate(y0: f32, y1: f32, y2: f32, y3: f32, x: f32) -> f32 {
    let a = -0.5 * y0 + 1.5 * y1 - 1.5 * y2 + 0.5 * y3;
    let b = y0 - 2.5 * y1 + 2.0 * y2 - 0.5 * y3;
    let c = -0.5 * y0 + 0.5 * y2;
    let d = y1;

    ((a * x + b) * x + c) * x + d
}

/// Cubic sample-rate converter with optional anti-alias pre-filter.
pub struct CubicConverter {
    ratio: f64,
    position: f64,
    channels: usize,
    in_hz: u32,
    out_hz: u32,
    history: Vec<f32>,
    extended: Vec<f32>,
    filtered: Vec<f32>,
    filter: Option<AntiAliasFilter>,
}

impl CubicConverter {
    /// Creates an unconfigured converter; call `initialize` before use.
    #[must_use]
    pub fn new() -> Self {
        Self {
            ratio: 1.0,
            position: 0.0,
            channels: 0,
            in_hz: 0,
            out_hz: 0,
            history: Vec::new(),
            extended: Vec::new(),
            filtered: Vec::new(),
            filter: None,
        }
    }

    /// Initial read position: history size minus the right support, so
    /// the first output leans on zeroed history rather than dropping the
    /// head of the stream.
    fn initial_position() -> f64 {
        (HISTORY_FRAMES - RIGHT_SUPPORT) as f64
    }
}

impl Default for CubicConverter {
    fn default() -> Self {
        Self::new()
    }
}

impl SampleRateConverter for CubicConverter {
    fn initialize(&mut self, in_hz: u32, out_hz: u32, channels: u32) -> Result<()> {
        check_rates(in_hz, out_hz, channels)?;

        self.in_hz = in_hz;
        self.out_hz = out_hz;
        self.channels = channels as usize;
        self.ratio = f64::from(in_hz) / f64::from(out_hz);
        self.position = Self::initial_position();
        self.history = vec![0.0; HISTORY_FRAMES * self.channels];
        self.extended.clear();
        self.filtered.clear();

        // Filter only when downsampling; upsampled images land above the
        // original Nyquist and the interpolator already suppresses them.
        self.filter = (out_hz < in_hz)
            .then(|| AntiAliasFilter::new(alias_cutoff(in_hz, out_hz), self.channels));

        Ok(())
    }

    fn convert(&mut self, input: &[f32], output: &mut [f32]) -> usize {
        if self.channels == 0 {
            return 0;
        }
        let input_frames = input.len() / self.channels;
        let max_output_frames = output.len() / self.channels;
        if input_frames == 0 || max_output_frames == 0 {
            return 0;
        }

        let samples = input_frames * self.channels;
        let source: &[f32] = match self.filter.as_mut() {
            Some(filter) => {
                self.filtered.resize(samples, 0.0);
                filter.process(input, &mut self.filtered, input_frames);
                &self.filtered
            }
            None => &input[..samples],
        };

        self.extended.clear();
        self.extended.extend_from_slice(&self.history);
        self.extended.extend_from_slice(source);

        let mut output_frames = 0;
        // Reads span floor(p)-1 ..= floor(p)+2.
        let limit = (HISTORY_FRAMES + input_frames - RIGHT_SUPPORT) as f64;
        while output_frames < max_output_frames && self.position < limit {
            #[expect(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let idx = self.position as usize;
            #[expect(clippy::cast_possible_truncation)]
            let frac = (self.position - idx as f64) as f32;

            for ch in 0..self.channels {
                let base = idx * self.channels + ch;
                let y0 = self.extended[base - self.channels];
                let y1 = self.extended[base];
                let y2 = self.extended[base + self.channels];
                let y3 = self.extended[base + 2 * self.channels];
                output[output_frames * self.channels + ch] =
                    cubic_interpolate(y0, y1, y2, y3, frac);
            }

            output_frames += 1;
            self.position += self.ratio;
        }

        self.position -= input_frames as f64;
        let tail = self.extended.len() - HISTORY_FRAMES * self.channels;
        self.history.copy_from_slice(&self.extended[tail..]);

        output_frames
    }

    fn latency_samples(&self) -> u32 {
        match self.filter {
            Some(_) => 1 + AntiAliasFilter::delay_samples(),
            None => 1,
        }
    }

    fn reset(&mut self) {
        self.position = Self::initial_position();
        self.history.fill(0.0);
        if let Some(filter) = self.filter.as_mut() {
            filter.reset();
        }
    }
}
