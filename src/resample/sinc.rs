//! Windowed-sinc converter.
//!
//! Evaluates a Kaiser-windowed sinc kernel at the fractional read
//! position for every output sample. Tap counts of 4, 8 and 16 trade CPU
//! for stopband depth; the kernel cutoff follows
//! `min(0.45, 0.95 * out_hz / (2 * in_hz))` so downsampling stays below
//! the output Nyquist frequency without a separate pre-filter.

use crate::error::Result;

use super::{alias_cutoff, check_rates, kaiser, sinc, SampleRateConverter};

/// Kaiser shape parameter for the interpolation kernel.
const KERNEL_BETA: f64 = 6.0;

/// Windowed-sinc sample-rate converter.
pub struct SincConverter {
    taps: usize,
    ratio: f64,
    position: f64,
    channels: usize,
    in_hz: u32,
    out_hz: u32,
    cutoff: f64,
    history: Vec<f32>,
    extended: Vec<f32>,
    window: Vec<f64>,
    kernel: Vec<f32>,
}

impl SincConverter {
    /// Creates a converter with the given tap count (4, 8 or 16).
    ///
    /// Other tap counts work but are not part of the quality ladder.
    #[must_use]
    pub fn new(taps: usize) -> Self {
        Self {
            taps: taps.max(2),
            ratio: 1.0,
            position: 0.0,
            channels: 0,
            in_hz: 0,
            out_hz: 0,
            cutoff: 0.45,
            history: Vec::new(),
            extended: Vec::new(),
            window: Vec::new(),
            kernel: Vec::new(),
        }
    }

    /// Number of taps of this converter.
    #[must_use]
    pub fn taps(&self) -> usize {
        self.taps
    }

    /// Initial read position inside the extended window.
    fn initial_position(&self) -> f64 {
        (self.taps - self.taps / 2) as f64
    }

    /// Fills `kernel` with windowed-sinc weights for fractional offset
    /// `frac`, normalized to unit DC gain.
    fn build_kernel(&mut self, frac: f64) {
        let half = (self.taps / 2) as isize;
        let mut sum = 0.0;
        for (i, weight) in self.window.iter_mut().enumerate() {
            let offset = (i as isize - half + 1) as f64 - frac;
            *weight = 2.0 * self.cutoff * sinc(2.0 * self.cutoff * offset)
                * kaiser(i, self.taps, KERNEL_BETA);
            sum += *weight;
        }

        // Normalize so a DC input passes at unity regardless of where the
        // fractional position lands between taps.
        let scale = if sum.abs() < 1e-12 { 1.0 } else { 1.0 / sum };
        #[expect(clippy::cast_possible_truncation)]
        for (weight, out) in self.window.iter().zip(self.kernel.iter_mut()) {
            *out = (*weight * scale) as f32;
        }
    }
}

impl SampleRateConverter for SincConverter {
    fn initialize(&mut self, in_hz: u32, out_hz: u32, channels: u32) -> Result<()> {
        check_rates(in_hz, out_hz, channels)?;

        self.in_hz = in_hz;
        self.out_hz = out_hz;
        self.channels = channels as usize;
        self.ratio = f64::from(in_hz) / f64::from(out_hz);
        self.cutoff = alias_cutoff(in_hz, out_hz);
        self.position = self.initial_position();
        self.history = vec![0.0; self.taps * self.channels];
        self.extended.clear();
        self.window = vec![0.0; self.taps];
        self.kernel = vec![0.0; self.taps];

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

        self.extended.clear();
        self.extended.extend_from_slice(&self.history);
        self.extended.extend_from_slice(&input[..input_frames * self.channels]);

        let half = self.taps / 2;
        let mut output_frames = 0;
        // Reads span floor(p) - taps/2 + 1 ..= floor(p) + taps/2.
        let limit = (self.taps + input_frames - half) as f64;
        while output_frames < max_output_frames && self.position < limit {
            #[expect(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let idx = self.position as usize;
            let frac = self.position - idx as f64;
            self.build_kernel(frac);

            for ch in 0..self.channels {
                let mut sum = 0.0;
                let start = (idx + 1 - half) * self.channels + ch;
                for (i, weight) in self.kernel.iter().enumerate() {
                    sum += self.extended[start + i * self.channels] * weight;
                }
                output[output_frames * self.channels + ch] = sum;
            }

            output_frames += 1;
            self.position += self.ratio;
        }

        self.position -= input_frames as f64;
        let tail = self.extended.len() - self.taps * self.channels;
        self.history.copy_from_slice(&self.extended[tail..]);

        output_frames
    }

    fn latency_samples(&self) -> u32 {
        (self.taps / 2) as u32
    }

    fn reset(&mut self) {
        self.position = self.initial_position();
        self.history.fill(0.0);
    }
}
