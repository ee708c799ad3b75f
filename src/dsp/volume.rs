//! Volume stage.
//!
//! One parameter in `[-60 dB, +12 dB]` mapped to a linear gain of
//! `10^(dB/20)` and multiplied into every sample in place. Unity gain
//! short-circuits the multiply; the floor of the range is treated as
//! silence. Zero latency.

use crate::{
    audio::AudioBuffer,
    error::{Error, Result},
    util::db_to_ratio,
};

use super::{DspConfig, DspParameter, DspProcessor};

/// Gain limits in dB. The lower bound doubles as the mute threshold.
pub const GAIN_RANGE_DB: (f32, f32) = (-60.0, 12.0);

/// In-place gain stage.
pub struct VolumeControl {
    initialized: bool,
    bypassed: bool,
    gain_db: f32,
    gain_linear: f32,
}

impl VolumeControl {
    /// Creates a unity-gain volume stage.
    #[must_use]
    pub fn new() -> Self {
        Self {
            initialized: false,
            bypassed: false,
            gain_db: 0.0,
            gain_linear: 1.0,
        }
    }

    /// The current linear gain factor.
    #[must_use]
    pub fn gain_linear(&self) -> f32 {
        self.gain_linear
    }
}

impl Default for VolumeControl {
    fn default() -> Self {
        Self::new()
    }
}

impl DspProcessor for VolumeControl {
    fn name(&self) -> &'static str {
        "volume"
    }

    fn initialize(&mut self, _config: &DspConfig) -> Result<()> {
        self.initialized = true;
        Ok(())
    }

    fn process(&mut self, buffer: &mut AudioBuffer) -> Result<()> {
        if !self.initialized {
            return Err(Error::not_initialized("volume"));
        }

        // Unity gain leaves the buffer byte-identical.
        if (self.gain_db - 0.0).abs() < f32::EPSILON {
            return Ok(());
        }

        // At the floor of the range the stage mutes outright.
        if self.gain_db <= GAIN_RANGE_DB.0 {
            buffer.samples_mut().fill(0.0);
            return Ok(());
        }

        for sample in buffer.samples_mut() {
            *sample *= self.gain_linear;
        }
        Ok(())
    }

    fn latency_samples(&self) -> u32 {
        0
    }

    fn reset(&mut self) {
        // Stateless between buffers.
    }

    fn set_bypass(&mut self, bypass: bool) {
        self.bypassed = bypass;
    }

    fn is_bypassed(&self) -> bool {
        self.bypassed
    }

    fn param_count(&self) -> usize {
        1
    }

    fn param_info(&self, index: usize) -> Result<DspParameter> {
        if index != 0 {
            return Err(Error::invalid_parameter(format!(
                "volume has one parameter, got index {index}"
            )));
        }

        Ok(DspParameter {
            name: "gain".to_string(),
            label: "Gain".to_string(),
            min_value: GAIN_RANGE_DB.0,
            max_value: GAIN_RANGE_DB.1,
            default_value: 0.0,
            current_value: self.gain_db,
            unit: "dB",
        })
    }

    fn get_param(&self, index: usize) -> f32 {
        if index == 0 {
            self.gain_db
        } else {
            0.0
        }
    }

    fn set_param(&mut self, index: usize, value: f32) -> Result<()> {
        if index != 0 {
            return Err(Error::invalid_parameter(format!(
                "volume has one parameter, got index {index}"
            )));
        }

        self.gain_db = value.clamp(GAIN_RANGE_DB.0, GAIN_RANGE_DB.1);
        self.gain_linear = db_to_ratio(self.gain_db);
        Ok(())
    }
}
