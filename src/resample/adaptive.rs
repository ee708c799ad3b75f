//! Adaptive quality selection.
//!
//! Wraps a converter and walks the quality ladder under CPU pressure:
//! per-call conversion time feeds an estimator that refreshes every
//! 1000 frames; when the estimate crosses `cpu_threshold` the quality
//! drops one tier, and when it falls below half the threshold the
//! quality rises one tier. Tier changes re-initialize the underlying
//! converter with the current `(in_hz, out_hz, channels)` and reset its
//! read position; the caller keeps feeding input without losing samples.

use std::time::Instant;

use crate::error::Result;

use super::{make_converter, ResampleQuality, SampleRateConverter};

/// Frames between CPU estimate refreshes.
const UPDATE_INTERVAL_FRAMES: u64 = 1000;

/// CPU usage estimator fed by per-call conversion timings.
///
/// The estimate is the accumulated conversion time in milliseconds over
/// each 1000-frame window, divided by 10 and clamped at 100: a window
/// that took a full second to convert reads as 100%.
#[derive(Debug, Default)]
pub struct PerformanceMonitor {
    accumulated_ms: f64,
    frames: u64,
    estimate: f64,
}

impl PerformanceMonitor {
    /// Creates an idle monitor with a zero estimate.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one conversion of `frames` frames taking `elapsed_ms`.
    ///
    /// Refreshes the estimate once enough frames have accumulated.
    pub fn record(&mut self, elapsed_ms: f64, frames: usize) {
        self.accumulated_ms += elapsed_ms;
        self.frames += frames as u64;

        if self.frames >= UPDATE_INTERVAL_FRAMES {
            self.estimate = (self.accumulated_ms / 10.0).min(100.0);
            self.accumulated_ms = 0.0;
            self.frames = 0;
        }
    }

    /// Latest CPU usage estimate in percent.
    #[must_use]
    pub fn cpu_estimate(&self) -> f64 {
        self.estimate
    }
}

/// Snapshot of the adaptive converter's state.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PerformanceStats {
    /// Latest CPU usage estimate in percent.
    pub cpu_estimate: f64,
    /// Quality tier currently in use.
    pub quality: ResampleQuality,
}

/// Converter that adjusts its quality tier to the measured load.
pub struct AdaptiveConverter {
    inner: Box<dyn SampleRateConverter>,
    monitor: PerformanceMonitor,
    quality: ResampleQuality,
    min_quality: ResampleQuality,
    max_quality: ResampleQuality,
    auto_adjust: bool,
    cpu_threshold: f64,
    in_hz: u32,
    out_hz: u32,
    channels: u32,
}

impl AdaptiveConverter {
    /// Creates an adaptive converter spanning `[min_quality, max_quality]`
    /// with the given CPU threshold in percent.
    #[must_use]
    pub fn new(
        min_quality: ResampleQuality,
        max_quality: ResampleQuality,
        cpu_threshold: f64,
    ) -> Self {
        let quality = ResampleQuality::Good.clamp(min_quality, max_quality);
        Self {
            inner: make_converter(quality),
            monitor: PerformanceMonitor::new(),
            quality,
            min_quality,
            max_quality,
            auto_adjust: true,
            cpu_threshold,
            in_hz: 0,
            out_hz: 0,
            channels: 0,
        }
    }

    /// The quality tier currently in use.
    #[must_use]
    pub fn current_quality(&self) -> ResampleQuality {
        self.quality
    }

    /// Enables or disables automatic tier walking.
    pub fn set_auto_adjust(&mut self, enabled: bool) {
        self.auto_adjust = enabled;
    }

    /// Sets the CPU threshold in percent.
    pub fn set_cpu_threshold(&mut self, threshold: f64) {
        self.cpu_threshold = threshold;
    }

    /// Narrows or widens the quality range, clamping the current tier.
    pub fn set_quality_range(&mut self, min_quality: ResampleQuality, max_quality: ResampleQuality) {
        self.min_quality = min_quality;
        self.max_quality = max_quality;

        let clamped = self.quality.clamp(min_quality, max_quality);
        if clamped != self.quality {
            self.switch_quality(clamped);
        }
    }

    /// Current CPU estimate and tier.
    #[must_use]
    pub fn performance_stats(&self) -> PerformanceStats {
        PerformanceStats {
            cpu_estimate: self.monitor.cpu_estimate(),
            quality: self.quality,
        }
    }

    /// Feeds an externally measured timing into the estimator.
    ///
    /// Exists for load injection in tests and benchmarks; normal operation
    /// records timings from `convert` itself.
    pub fn record_timing(&mut self, elapsed_ms: f64, frames: usize) {
        self.monitor.record(elapsed_ms, frames);
    }

    /// Picks the tier suggested by the current estimate.
    fn select_quality(&self) -> ResampleQuality {
        let estimate = self.monitor.cpu_estimate();

        if estimate > self.cpu_threshold {
            self.quality.lower().clamp(self.min_quality, self.max_quality)
        } else if estimate < self.cpu_threshold / 2.0 {
            self.quality.higher().clamp(self.min_quality, self.max_quality)
        } else {
            self.quality
        }
    }

    /// Rebuilds the inner converter at `quality` with the current rates.
    fn switch_quality(&mut self, quality: ResampleQuality) {
        info!(
            "resampler quality {} -> {} (cpu {:.1}%)",
            self.quality.name(),
            quality.name(),
            self.monitor.cpu_estimate()
        );

        self.quality = quality;
        self.inner = make_converter(quality);
        if self.channels > 0 {
            if let Err(e) = self.inner.initialize(self.in_hz, self.out_hz, self.channels) {
                error!("failed to re-initialize converter: {e}");
            }
        }
    }
}

impl SampleRateConverter for AdaptiveConverter {
    fn initialize(&mut self, in_hz: u32, out_hz: u32, channels: u32) -> Result<()> {
        self.in_hz = in_hz;
        self.out_hz = out_hz;
        self.channels = channels;
        self.monitor = PerformanceMonitor::new();
        self.inner.initialize(in_hz, out_hz, channels)
    }

    fn convert(&mut self, input: &[f32], output: &mut [f32]) -> usize {
        if self.auto_adjust {
            let suggested = self.select_quality();
            if suggested != self.quality {
                self.switch_quality(suggested);
            }
        }

        let started = Instant::now();
        let frames = self.inner.convert(input, output);
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.monitor.record(elapsed_ms, frames);

        frames
    }

    fn latency_samples(&self) -> u32 {
        self.inner.latency_samples()
    }

    fn reset(&mut self) {
        self.inner.reset();
        self.monitor = PerformanceMonitor::new();
    }
}
