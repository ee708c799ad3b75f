//! WAV (RIFF/WAVE) decoder.
//!
//! Handles 16/24/32-bit PCM in a RIFF container through Symphonia's
//! `WavReader`/`PcmDecoder` pair. Probing checks the `RIFF....WAVE`
//! magic, which needs 12 header bytes.

use std::path::Path;

use symphonia::{
    core::{codecs::CodecRegistry, probe::Hint, probe::Probe},
    default::{codecs::PcmDecoder, formats::WavReader},
};

use crate::error::Result;

use super::{Decoder, DecoderStream, SymphoniaStream, PROBE_CERTAIN};

/// Decoder for RIFF/WAVE PCM files.
#[derive(Default)]
pub struct WavDecoder;

impl WavDecoder {
    /// Creates the WAV decoder.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for WavDecoder {
    fn name(&self) -> &'static str {
        "wav"
    }

    fn probe(&self, header: &[u8]) -> u8 {
        if header.len() >= 12 && &header[0..4] == b"RIFF" && &header[8..12] == b"WAVE" {
            PROBE_CERTAIN
        } else {
            0
        }
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["wav", "wave"]
    }

    fn open(&self, path: &Path) -> Result<Box<dyn DecoderStream>> {
        let mut codecs = CodecRegistry::new();
        codecs.register_all::<PcmDecoder>();
        let mut probe = Probe::default();
        probe.register_all::<WavReader>();

        let mut hint = Hint::new();
        hint.with_extension("wav");
        hint.mime_type("audio/wav");

        let stream = SymphoniaStream::open(path, &codecs, &probe, hint, 0)?;
        Ok(Box::new(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probes_riff_wave_magic() {
        let decoder = WavDecoder::new();
        assert_eq!(decoder.probe(b"RIFF\x24\x08\x00\x00WAVEfmt "), 100);
        assert_eq!(decoder.probe(b"RIFF\x24\x08\x00\x00AVI fmt "), 0);
        assert_eq!(decoder.probe(b"RIFF"), 0);
        assert_eq!(decoder.probe(b""), 0);
    }
}
