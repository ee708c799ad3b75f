//! Linear interpolation converter.
//!
//! Two-point interpolation with no filtering: the cheapest tier, used
//! when the adaptive selector has backed all the way off. One input
//! frame of history carries the interpolation window across calls.

use crate::error::Result;

use super::{check_rates, SampleRateConverter};

/// History window in frames: the previous input frame.
const HISTORY_FRAMES: usize = 1;

/// Linear sample-rate converter.
pub struct LinearConverter {
    ratio: f64,
    position: f64,
    channels: usize,
    in_hz: u32,
    out_hz: u32,
    history: Vec<f32>,
    extended: Vec<f32>,
}

impl LinearConverter {
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
        }
    }
}

impl Default for LinearConverter {
    fn default() -> Self {
        Self::new()
    }
}

impl SampleRateConverter for LinearConverter {
    fn initialize(&mut self, in_hz: u32, out_hz: u32, channels: u32) -> Result<()> {
        check_rates(in_hz, out_hz, channels)?;

        self.in_hz = in_hz;
        self.out_hz = out_hz;
        self.channels = channels as usize;
        self.ratio = f64::from(in_hz) / f64::from(out_hz);
        self.position = 0.0;
        self.history = vec![0.0; HISTORY_FRAMES * self.channels];
        self.extended.clear();

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

        // Extended window: one history frame followed by the input.
        self.extended.clear();
        self.extended.extend_from_slice(&self.history);
        self.extended.extend_from_slice(&input[..input_frames * self.channels]);

        let mut output_frames = 0;
        // Interpolation reads frames floor(p) and floor(p)+1, so the
        // window is exhausted once p reaches the final extended frame.
        let limit = (HISTORY_FRAMES + input_frames - 1) as f64;
        while output_frames < max_output_frames && self.position < limit {
            #[expect(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let idx = self.position as usize;
            #[expect(clippy::cast_possible_truncation)]
            let frac = (self.position - idx as f64) as f32;

            for ch in 0..self.channels {
                let a = self.extended[idx * self.channels + ch];
                let b = self.extended[(idx + 1) * self.channels + ch];
                output[output_frames * self.channels + ch] = a + (b - a) * frac;
            }

            output_frames += 1;
            self.position += self.ratio;
        }

        // Slide the window: keep the last history frame, carry the
        // fractional read position.
        self.position -= input_frames as f64;
        let tail = self.extended.len() - HISTORY_FRAMES * self.channels;
        self.history.copy_from_slice(&self.extended[tail..]);

        output_frames
    }

    fn latency_samples(&self) -> u32 {
        1
    }

    fn reset(&mut self) {
        self.position = 0.0;
        self.history.fill(0.0);
    }
}
