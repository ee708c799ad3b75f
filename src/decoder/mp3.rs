//! MP3 decoder.
//!
//! Streaming decode through Symphonia's `MpaReader`/`MpaDecoder` pair with
//! frame-accurate seeking. ID3 tags are consumed by the reader's metadata
//! pass rather than parsed by hand; probing recognizes both an `ID3`
//! prefix and a bare MPEG frame sync (`0xFF 0xEx/0xFx`).

use std::path::Path;

use symphonia::{
    core::{codecs::CodecRegistry, probe::Hint, probe::Probe},
    default::{codecs::MpaDecoder, formats::MpaReader},
};

use crate::error::Result;

use super::{Decoder, DecoderStream, SymphoniaStream};

/// Decoder for MPEG layer III streams.
#[derive(Default)]
pub struct Mp3Decoder;

impl Mp3Decoder {
    /// Creates the MP3 decoder.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for Mp3Decoder {
    fn name(&self) -> &'static str {
        "mp3"
    }

    fn probe(&self, header: &[u8]) -> u8 {
        if header.len() >= 3 && &header[0..3] == b"ID3" {
            // Tagged stream: almost certainly MP3, but the tag hides the
            // first frame header so leave room for a container decoder.
            return 90;
        }
        if header.len() >= 2 && header[0] == 0xFF && (header[1] & 0xE0) == 0xE0 {
            // Bare frame sync also matches AAC/ADTS, hence the margin.
            return 80;
        }
        0
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["mp3"]
    }

    fn open(&self, path: &Path) -> Result<Box<dyn DecoderStream>> {
        let mut codecs = CodecRegistry::new();
        codecs.register_all::<MpaDecoder>();
        let mut probe = Probe::default();
        probe.register_all::<MpaReader>();

        let mut hint = Hint::new();
        hint.with_extension("mp3");
        hint.mime_type("audio/mpeg");

        let stream = SymphoniaStream::open(path, &codecs, &probe, hint, 0)?;
        Ok(Box::new(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probes_id3_and_frame_sync() {
        let decoder = Mp3Decoder::new();
        assert_eq!(decoder.probe(b"ID3\x04\x00\x00\x00\x00\x00\x00"), 90);
        assert_eq!(decoder.probe(&[0xFF, 0xFB, 0x90, 0x00]), 80);
        assert_eq!(decoder.probe(&[0xFF, 0xE2, 0x00, 0x00]), 80);
        assert_eq!(decoder.probe(&[0xFF, 0x1B]), 0);
        assert_eq!(decoder.probe(b"RIFF"), 0);
        assert_eq!(decoder.probe(&[0xFF]), 0);
    }
}
