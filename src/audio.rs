//! Core audio types shared by every component.
//!
//! Defines the sample formats, stream descriptions and buffer records that
//! flow between decoders, converters, the DSP chain, the playback engine
//! and the output backend, plus the table of standard sample rates used to
//! route non-standard rates.

use crate::util::ToF32;

/// Audio sample formats produced by decoders and accepted by outputs.
///
/// `Float32` is the internal processing format: every integer format is
/// normalized into `[-1.0, 1.0]` by dividing by `2^(bits-1)` before the
/// DSP chain sees it.
#[derive(Copy, Clone, Debug, Default, Eq, Hash, PartialEq)]
pub enum SampleFormat {
    /// Format could not be determined.
    #[default]
    Unknown,
    /// 16-bit signed integer PCM.
    Int16,
    /// 24-bit signed integer PCM (in a 32-bit container).
    Int24,
    /// 32-bit signed integer PCM.
    Int32,
    /// 32-bit floating point.
    Float32,
    /// 64-bit floating point.
    Float64,
}

impl SampleFormat {
    /// Size of one sample of this format in bytes.
    ///
    /// `Int24` is carried in a 4-byte container.
    #[must_use]
    pub fn size_bytes(self) -> usize {
        match self {
            Self::Unknown => 0,
            Self::Int16 => 2,
            Self::Int24 | Self::Int32 | Self::Float32 => 4,
            Self::Float64 => 8,
        }
    }

    /// Number of significant bits per sample, if known.
    #[must_use]
    pub fn bits_per_sample(self) -> Option<u32> {
        match self {
            Self::Unknown => None,
            Self::Int16 => Some(16),
            Self::Int24 => Some(24),
            Self::Int32 | Self::Float32 => Some(32),
            Self::Float64 => Some(64),
        }
    }
}

impl std::fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Unknown => "unknown",
            Self::Int16 => "i16",
            Self::Int24 => "i24",
            Self::Int32 => "i32",
            Self::Float32 => "f32",
            Self::Float64 => "f64",
        };
        f.write_str(name)
    }
}

/// Description of a decoded audio stream.
///
/// Invariant: when both `total_samples` and `sample_rate` are non-zero,
/// `duration_ms` agrees with `total_samples * 1000 / sample_rate` to
/// within a millisecond.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct AudioStreamInfo {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Number of interleaved channels.
    pub channels: u32,
    /// Sample format as decoded.
    pub format: SampleFormat,
    /// Total samples per channel, 0 if unknown.
    pub total_samples: u64,
    /// Duration in milliseconds, 0 if unknown.
    pub duration_ms: u64,
    /// Bitrate in kbps, 0 if unknown.
    pub bitrate_kbps: u32,
}

impl AudioStreamInfo {
    /// Derives the duration from `total_samples` and `sample_rate`.
    ///
    /// Returns 0 when either value is unknown.
    #[must_use]
    pub fn derive_duration_ms(total_samples: u64, sample_rate: u32) -> u64 {
        if total_samples == 0 || sample_rate == 0 {
            return 0;
        }
        total_samples
            .saturating_mul(1000)
            .checked_div(u64::from(sample_rate))
            .unwrap_or(0)
    }
}

/// A block of interleaved `f32` samples with bookkeeping flags.
///
/// The producer sets `end_of_stream` on the final buffer of a track;
/// `discontinuity` is set on the first buffer after a seek and tells the
/// DSP chain to reset its state.
#[derive(Clone, Debug, Default)]
pub struct AudioBuffer {
    /// Interleaved sample data, `frames * channels` values in use.
    pub data: Vec<f32>,
    /// Sample rate of the data in Hz.
    pub sample_rate: u32,
    /// Number of interleaved channels.
    pub channels: u32,
    /// Format the data was decoded from.
    pub format: SampleFormat,
    /// Number of frames currently held.
    pub frames: usize,
    /// Allocated capacity in frames.
    pub capacity: usize,
    /// Timestamp of the first frame in microseconds.
    pub timestamp_us: u64,
    /// Position of the first frame in samples from track start.
    pub position_samples: u64,
    /// True if this is the last buffer of the stream.
    pub end_of_stream: bool,
    /// True if there is a gap (seek) before this buffer.
    pub discontinuity: bool,
}

impl AudioBuffer {
    /// Allocates a buffer for `capacity` frames of `channels` channels.
    #[must_use]
    pub fn with_capacity(capacity: usize, channels: u32, sample_rate: u32) -> Self {
        Self {
            data: vec![0.0; capacity * channels as usize],
            sample_rate,
            channels,
            format: SampleFormat::Float32,
            frames: 0,
            capacity,
            ..Self::default()
        }
    }

    /// The sample slice currently in use.
    #[must_use]
    pub fn samples(&self) -> &[f32] {
        &self.data[..self.frames * self.channels as usize]
    }

    /// The mutable sample slice currently in use.
    #[must_use]
    pub fn samples_mut(&mut self) -> &mut [f32] {
        &mut self.data[..self.frames * self.channels as usize]
    }
}

/// The standard sample rates, ascending.
///
/// Non-standard rates are routed through the nearest entry of this table
/// by the universal converter.
pub const STANDARD_RATES: [u32; 16] = [
    8_000, 11_025, 16_000, 22_050, 32_000, 37_800, 44_100, 48_000, 88_200, 96_000, 176_400,
    192_000, 352_800, 384_000, 705_600, 768_000,
];

/// Returns true if `rate` is one of the standard sample rates.
#[must_use]
pub fn is_standard_rate(rate: u32) -> bool {
    STANDARD_RATES.contains(&rate)
}

/// Returns the standard rate nearest to `rate`.
#[must_use]
pub fn nearest_standard_rate(rate: u32) -> u32 {
    let mut nearest = STANDARD_RATES[0];
    let mut min_diff = rate.abs_diff(nearest);
    for candidate in STANDARD_RATES {
        let diff = rate.abs_diff(candidate);
        if diff < min_diff {
            min_diff = diff;
            nearest = candidate;
        }
    }
    nearest
}

/// Human-readable category of a sample rate, used in logs and listings.
#[must_use]
pub fn rate_category(rate: u32) -> &'static str {
    match rate {
        0..=16_000 => "telephony",
        16_001..=22_050 => "consumer",
        22_051..=48_000 => "cd",
        48_001..=96_000 => "dvd",
        96_001..=192_000 => "studio",
        192_001..=384_000 => "hd",
        _ => "uhd",
    }
}

/// Formats a rate as kHz with its category, e.g. `44.1 kHz (cd)`.
#[must_use]
pub fn describe_rate(rate: u32) -> String {
    format!("{:.1} kHz ({})", rate.to_f32_lossy() / 1000.0, rate_category(rate))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_matches_samples() {
        let info = AudioStreamInfo {
            sample_rate: 44_100,
            channels: 2,
            format: SampleFormat::Int16,
            total_samples: 88_200,
            duration_ms: AudioStreamInfo::derive_duration_ms(88_200, 44_100),
            bitrate_kbps: 1411,
        };
        assert_eq!(info.duration_ms, 2000);
    }

    #[test]
    fn nearest_rate_routing() {
        assert_eq!(nearest_standard_rate(44_100), 44_100);
        assert_eq!(nearest_standard_rate(44_000), 44_100);
        assert_eq!(nearest_standard_rate(50_000), 48_000);
        assert_eq!(nearest_standard_rate(1_000_000), 768_000);
        assert_eq!(nearest_standard_rate(1), 8_000);
    }

    #[test]
    fn standard_rates_are_sorted_and_known() {
        let mut sorted = STANDARD_RATES;
        sorted.sort_unstable();
        assert_eq!(sorted, STANDARD_RATES);
        assert!(is_standard_rate(37_800));
        assert!(!is_standard_rate(37_801));
    }

    #[test]
    fn buffer_slices_track_frames() {
        let mut buffer = AudioBuffer::with_capacity(128, 2, 48_000);
        assert_eq!(buffer.capacity, 128);
        assert!(buffer.samples().is_empty());
        buffer.frames = 4;
        assert_eq!(buffer.samples().len(), 8);
    }
}
