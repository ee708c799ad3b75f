//! Universal conversion front-end.
//!
//! Multiplexes the converter family over arbitrary rate pairs:
//!
//! * identity rates short-circuit to a plain copy,
//! * converters are cached by `(in_hz, out_hz, channels)` and keep their
//!   history across calls,
//! * non-standard rates are routed via the nearest standard rate, so an
//!   oddball 44 056 Hz stream still produces audio.

use std::collections::HashMap;

use crate::audio::{is_standard_rate, nearest_standard_rate};

use super::{make_converter, ResampleQuality, SampleRateConverter};

/// Cache key: one converter per distinct conversion.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
struct ConversionKey {
    in_hz: u32,
    out_hz: u32,
    channels: u32,
}

/// Cache-backed converter multiplexer.
///
/// All converters in the cache share one quality tier; changing the tier
/// clears the cache so stale algorithms never linger.
pub struct UniversalConverter {
    quality: ResampleQuality,
    cache: HashMap<ConversionKey, Box<dyn SampleRateConverter>>,
    stage: Vec<f32>,
}

impl UniversalConverter {
    /// Creates a multiplexer producing converters of `quality`.
    #[must_use]
    pub fn new(quality: ResampleQuality) -> Self {
        Self {
            quality,
            cache: HashMap::new(),
            stage: Vec::new(),
        }
    }

    /// The quality tier of converters produced by this multiplexer.
    #[must_use]
    pub fn quality(&self) -> ResampleQuality {
        self.quality
    }

    /// Switches the quality tier, clearing cached converter state.
    pub fn set_quality(&mut self, quality: ResampleQuality) {
        if self.quality != quality {
            self.quality = quality;
            self.cache.clear();
        }
    }

    /// Converts `input` at `in_hz` into `output` at `out_hz`.
    ///
    /// Returns the number of output frames produced. Identity rates copy
    /// bytes unchanged. Non-standard rates are bridged through the
    /// nearest standard rate (two-stage when the input rate is odd, one
    /// stage when only the output rate is).
    pub fn convert(
        &mut self,
        input: &[f32],
        output: &mut [f32],
        in_hz: u32,
        out_hz: u32,
        channels: u32,
    ) -> usize {
        if channels == 0 {
            return 0;
        }
        let channels_usize = channels as usize;
        let input_frames = input.len() / channels_usize;
        let max_output_frames = output.len() / channels_usize;
        if input_frames == 0 || max_output_frames == 0 {
            return 0;
        }

        // Fast path: same rate is a plain copy, byte-identical.
        if in_hz == out_hz {
            let frames = input_frames.min(max_output_frames);
            output[..frames * channels_usize]
                .copy_from_slice(&input[..frames * channels_usize]);
            return frames;
        }

        if !is_standard_rate(in_hz) {
            let bridge = nearest_standard_rate(in_hz);
            debug!("routing non-standard input rate {in_hz} Hz via {bridge} Hz");
            if bridge == out_hz {
                return self.convert_cached(input, output, bridge, out_hz, channels);
            }

            // Two stages through a scratch buffer sized for the bridge rate.
            let bridge_frames = (input_frames as u64)
                .saturating_mul(u64::from(bridge))
                .div_ceil(u64::from(in_hz)) as usize
                + 8;
            let mut staged = std::mem::take(&mut self.stage);
            staged.resize(bridge_frames * channels_usize, 0.0);
            let staged_frames =
                self.convert_cached(input, &mut staged, in_hz.max(1), bridge, channels);
            let frames = self.convert_cached(
                &staged[..staged_frames * channels_usize],
                output,
                bridge,
                out_hz,
                channels,
            );
            self.stage = staged;
            return frames;
        }

        if !is_standard_rate(out_hz) {
            let bridge = nearest_standard_rate(out_hz);
            debug!("routing non-standard output rate {out_hz} Hz via {bridge} Hz");
            return self.convert_cached(input, output, in_hz, bridge, channels);
        }

        self.convert_cached(input, output, in_hz, out_hz, channels)
    }

    /// Converts through the cached converter for this key, creating and
    /// initializing one on first use.
    fn convert_cached(
        &mut self,
        input: &[f32],
        output: &mut [f32],
        in_hz: u32,
        out_hz: u32,
        channels: u32,
    ) -> usize {
        if in_hz == out_hz {
            let channels = channels as usize;
            let frames = (input.len() / channels).min(output.len() / channels);
            output[..frames * channels].copy_from_slice(&input[..frames * channels]);
            return frames;
        }

        let key = ConversionKey {
            in_hz,
            out_hz,
            channels,
        };
        let quality = self.quality;
        let converter = self.cache.entry(key).or_insert_with(|| {
            let mut converter = make_converter(quality);
            // Key values are validated non-zero by the caller.
            if let Err(e) = converter.initialize(in_hz, out_hz, channels) {
                error!("converter initialization failed: {e}");
            }
            converter
        });

        converter.convert(input, output)
    }

    /// Number of distinct conversions currently cached.
    #[must_use]
    pub fn cache_size(&self) -> usize {
        self.cache.len()
    }

    /// Human-readable list of cached conversions, for diagnostics.
    #[must_use]
    pub fn cached_conversions(&self) -> Vec<String> {
        self.cache
            .keys()
            .map(|key| {
                format!(
                    "{} Hz -> {} Hz ({} channels)",
                    key.in_hz, key.out_hz, key.channels
                )
            })
            .collect()
    }

    /// Drops all cached converters and their history.
    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }
}

impl Default for UniversalConverter {
    fn default() -> Self {
        Self::new(ResampleQuality::Good)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_is_byte_identical() {
        let mut universal = UniversalConverter::default();
        let input: Vec<f32> = (0..256).map(|i| (i as f32 * 0.013).sin()).collect();
        let mut output = vec![0.0; 256];

        let frames = universal.convert(&input, &mut output, 48_000, 48_000, 2);
        assert_eq!(frames, 128);
        assert_eq!(input, output);
        // The fast path must not have built a converter.
        assert_eq!(universal.cache_size(), 0);
    }

    #[test]
    fn converters_are_cached_per_key() {
        let mut universal = UniversalConverter::default();
        let input = vec![0.1_f32; 480];
        let mut output = vec![0.0; 2048];

        universal.convert(&input, &mut output, 44_100, 48_000, 1);
        universal.convert(&input, &mut output, 44_100, 48_000, 1);
        assert_eq!(universal.cache_size(), 1);

        universal.convert(&input, &mut output, 44_100, 96_000, 1);
        assert_eq!(universal.cache_size(), 2);

        universal.clear_cache();
        assert_eq!(universal.cache_size(), 0);
    }

    #[test]
    fn non_standard_input_still_produces_audio() {
        let mut universal = UniversalConverter::default();
        let input: Vec<f32> = (0..1000).map(|i| (i as f32 * 0.02).sin()).collect();
        let mut output = vec![0.0; 8192];

        // 44 056 Hz (NTSC pull-down rate) is not in the standard table.
        let frames = universal.convert(&input, &mut output, 44_056, 48_000, 1);
        assert!(frames > 0);
        assert!(output[..frames].iter().any(|s| s.abs() > 0.01));
    }

    #[test]
    fn quality_change_clears_cache() {
        let mut universal = UniversalConverter::new(ResampleQuality::Fast);
        let input = vec![0.0_f32; 100];
        let mut output = vec![0.0; 400];
        universal.convert(&input, &mut output, 44_100, 48_000, 1);
        assert_eq!(universal.cache_size(), 1);

        universal.set_quality(ResampleQuality::Best);
        assert_eq!(universal.cache_size(), 0);
        assert_eq!(universal.quality(), ResampleQuality::Best);
    }

    #[test]
    fn zero_frames_return_zero() {
        let mut universal = UniversalConverter::default();
        let mut output = vec![0.0; 64];
        assert_eq!(universal.convert(&[], &mut output, 44_100, 48_000, 2), 0);
        assert_eq!(universal.convert(&[0.0; 64], &mut [], 44_100, 48_000, 2), 0);
    }
}
