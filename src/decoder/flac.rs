//! FLAC decoder.
//!
//! Lossless decode through Symphonia's `FlacReader`/`FlacDecoder` pair.
//! Probing checks the `fLaC` stream marker, which needs 4 header bytes.

use std::path::Path;

use symphonia::{
    core::{codecs::CodecRegistry, probe::Hint, probe::Probe},
    default::{codecs::FlacDecoder as FlacCodec, formats::FlacReader},
};

use crate::error::Result;

use super::{Decoder, DecoderStream, SymphoniaStream, PROBE_CERTAIN};

/// Decoder for FLAC streams.
#[derive(Default)]
pub struct FlacDecoder;

impl FlacDecoder {
    /// Creates the FLAC decoder.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for FlacDecoder {
    fn name(&self) -> &'static str {
        "flac"
    }

    fn probe(&self, header: &[u8]) -> u8 {
        if header.len() >= 4 && &header[0..4] == b"fLaC" {
            PROBE_CERTAIN
        } else {
            0
        }
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["flac"]
    }

    fn open(&self, path: &Path) -> Result<Box<dyn DecoderStream>> {
        let mut codecs = CodecRegistry::new();
        codecs.register_all::<FlacCodec>();
        let mut probe = Probe::default();
        probe.register_all::<FlacReader>();

        let mut hint = Hint::new();
        hint.with_extension("flac");
        hint.mime_type("audio/flac");

        let stream = SymphoniaStream::open(path, &codecs, &probe, hint, 0)?;
        Ok(Box::new(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probes_flac_marker() {
        let decoder = FlacDecoder::new();
        assert_eq!(decoder.probe(b"fLaC\x00\x00\x00\x22"), 100);
        assert_eq!(decoder.probe(b"fLa"), 0);
        assert_eq!(decoder.probe(b"OggS"), 0);
    }
}
