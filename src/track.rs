//! Track records for the playback engine.
//!
//! A [`TrackInfo`] couples a file path with the encoder delay/padding
//! counts needed for gapless playback. Lossy encoders prepend priming
//! samples and append padding to fill the final frame; both must be
//! trimmed or consecutive tracks audibly glitch at the seam.

use std::path::{Path, PathBuf};

/// Per-track metadata relevant to gapless scheduling.
///
/// `encoder_delay_samples` is trimmed from the head of the stream,
/// `encoder_padding_samples` from its tail. Both default to 0 when the
/// container does not report them, in which case the full stream plays.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TrackInfo {
    /// Path the track was opened from.
    pub file_path: PathBuf,
    /// Priming samples the encoder prepended (head trim).
    pub encoder_delay_samples: u32,
    /// Padding samples the encoder appended (tail trim).
    pub encoder_padding_samples: u32,
    /// Total samples per channel, 0 if unknown.
    pub total_samples: u64,
}

impl TrackInfo {
    /// Creates a track record with unknown delay/padding.
    #[must_use]
    pub fn new(file_path: impl AsRef<Path>, total_samples: u64) -> Self {
        Self {
            file_path: file_path.as_ref().to_path_buf(),
            encoder_delay_samples: 0,
            encoder_padding_samples: 0,
            total_samples,
        }
    }

    /// The last playable sample position: `total_samples - padding`.
    ///
    /// Returns `u64::MAX` when the total is unknown, so position
    /// comparisons never trigger a premature end-of-stream.
    #[must_use]
    pub fn effective_end(&self) -> u64 {
        if self.total_samples == 0 {
            return u64::MAX;
        }
        self.total_samples
            .saturating_sub(u64::from(self.encoder_padding_samples))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_end_trims_padding() {
        let mut track = TrackInfo::new("a.mp3", 96_000);
        track.encoder_padding_samples = 576;
        assert_eq!(track.effective_end(), 95_424);
    }

    #[test]
    fn unknown_total_never_ends_early() {
        let track = TrackInfo::new("stream.mp3", 0);
        assert_eq!(track.effective_end(), u64::MAX);
    }
}
