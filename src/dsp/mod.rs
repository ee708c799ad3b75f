//! DSP processing chain.
//!
//! A linear, fixed-order chain of [`DspProcessor`] stages that run
//! in-place over interleaved `Float32` buffers between the mixer and the
//! output. Stages expose an enumerated parameter table — `(index, name,
//! label, min, max, default, current, unit)` — instead of any reflective
//! parameter surface, so hosts and UIs can render controls without
//! knowing the stage.
//!
//! Chain rules:
//! * Processing order is registration order.
//! * `reset` on the chain resets every stage (used at discontinuities).
//! * Bypass is stage-local; a bypassed stage still reports its usual
//!   latency so scheduling stays stable when it is toggled.

pub mod equalizer;
pub mod volume;

use crate::{
    audio::{AudioBuffer, SampleFormat},
    error::Result,
};

/// Stream configuration handed to every stage at initialization.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DspConfig {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Number of interleaved channels.
    pub channels: u32,
    /// Sample format; the chain always runs `Float32`.
    pub format: SampleFormat,
    /// Upper bound for `frames` in any processed buffer.
    pub max_buffer_frames: usize,
}

/// One row of a stage's parameter table.
#[derive(Clone, Debug, PartialEq)]
pub struct DspParameter {
    /// Machine name, e.g. `band_1khz`.
    pub name: String,
    /// Display label, e.g. `1.0 kHz`.
    pub label: String,
    /// Minimum value.
    pub min_value: f32,
    /// Maximum value.
    pub max_value: f32,
    /// Default value.
    pub default_value: f32,
    /// Current value.
    pub current_value: f32,
    /// Unit string, e.g. `dB`.
    pub unit: &'static str,
}

/// A single stage of the DSP chain.
pub trait DspProcessor: Send {
    /// Stage name used in logs and listings.
    fn name(&self) -> &'static str;

    /// Prepares the stage for a stream.
    ///
    /// Called before the first `process`; may be called again with a new
    /// configuration after a format change.
    ///
    /// # Errors
    ///
    /// Returns `NotSupported` when the configuration is outside the
    /// stage's capabilities (e.g. too many channels).
    fn initialize(&mut self, config: &DspConfig) -> Result<()>;

    /// Processes `buffer` in place.
    ///
    /// # Errors
    ///
    /// Returns error when the stage is not initialized.
    fn process(&mut self, buffer: &mut AudioBuffer) -> Result<()>;

    /// Processing latency in samples.
    ///
    /// Reported even while bypassed.
    fn latency_samples(&self) -> u32;

    /// Clears internal state, e.g. filter histories, at discontinuities.
    fn reset(&mut self);

    /// Enables or disables bypass.
    fn set_bypass(&mut self, bypass: bool);

    /// True when the stage is bypassed.
    fn is_bypassed(&self) -> bool;

    /// Number of parameters in the table.
    fn param_count(&self) -> usize;

    /// Table row for parameter `index`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` for an out-of-range index.
    fn param_info(&self, index: usize) -> Result<DspParameter>;

    /// Current value of parameter `index`, or 0.0 when out of range.
    fn get_param(&self, index: usize) -> f32;

    /// Sets parameter `index` to `value`, clamping to the valid range.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` for an out-of-range index.
    fn set_param(&mut self, index: usize, value: f32) -> Result<()>;

    /// Releases resources before destruction.
    fn shutdown(&mut self) {}
}

/// Linear chain of DSP stages.
#[derive(Default)]
pub struct DspChain {
    stages: Vec<Box<dyn DspProcessor>>,
    config: Option<DspConfig>,
}

impl DspChain {
    /// Creates an empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `stage` to the end of the chain.
    ///
    /// If the chain is already initialized the stage is initialized with
    /// the chain's configuration before it joins.
    ///
    /// # Errors
    ///
    /// Returns the stage's initialization error; the stage is not added.
    pub fn push(&mut self, mut stage: Box<dyn DspProcessor>) -> Result<()> {
        if let Some(config) = &self.config {
            stage.initialize(config)?;
        }
        debug!("dsp chain: added stage {}", stage.name());
        self.stages.push(stage);
        Ok(())
    }

    /// Initializes every stage for `config`.
    ///
    /// # Errors
    ///
    /// Returns the first failing stage's error; earlier stages stay
    /// initialized.
    pub fn initialize(&mut self, config: DspConfig) -> Result<()> {
        for stage in &mut self.stages {
            stage.initialize(&config)?;
        }
        self.config = Some(config);
        Ok(())
    }

    /// Runs `buffer` through every non-bypassed stage in order.
    ///
    /// A buffer flagged `discontinuity` resets the chain first.
    ///
    /// # Errors
    ///
    /// Returns the first failing stage's error.
    pub fn process(&mut self, buffer: &mut AudioBuffer) -> Result<()> {
        if buffer.discontinuity {
            self.reset();
        }

        for stage in &mut self.stages {
            if !stage.is_bypassed() {
                stage.process(buffer)?;
            }
        }
        Ok(())
    }

    /// Resets every stage.
    pub fn reset(&mut self) {
        for stage in &mut self.stages {
            stage.reset();
        }
    }

    /// Total chain latency: the sum over all stages, bypassed included.
    #[must_use]
    pub fn latency_samples(&self) -> u32 {
        self.stages.iter().map(|s| s.latency_samples()).sum()
    }

    /// Number of stages in the chain.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// True when the chain has no stages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// The stage at `index`, if present.
    #[must_use]
    pub fn stage(&self, index: usize) -> Option<&dyn DspProcessor> {
        self.stages.get(index).map(AsRef::as_ref)
    }

    /// The mutable stage at `index`, if present.
    pub fn stage_mut(&mut self, index: usize) -> Option<&mut Box<dyn DspProcessor>> {
        self.stages.get_mut(index)
    }

    /// Shuts down and drops every stage, back to front.
    pub fn shutdown(&mut self) {
        while let Some(mut stage) = self.stages.pop() {
            stage.shutdown();
        }
        self.config = None;
    }
}
