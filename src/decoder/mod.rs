//! Decoder contract and shared Symphonia decode machinery.
//!
//! A decoder is split in two:
//! * [`Decoder`] — the stateless factory a plugin registers: probes file
//!   headers, lists extensions, opens streams.
//! * [`DecoderStream`] — an open stream: stream info, block decoding,
//!   seeking, metadata. Closing is `Drop`, which makes it idempotent.
//!
//! The built-in WAV, MP3 and FLAC decoders all ride [`SymphoniaStream`],
//! which wraps a format-specific Symphonia reader/decoder pair and
//! implements the error recovery the host relies on:
//! * Skips corrupted packets (up to 3 consecutive)
//! * Handles codec reset requests
//! * Ensures clean state by clearing buffers after any decoder error
//!
//! # Block contract
//!
//! `decode_block` fills an interleaved `i32` slice using the full signed
//! range; the host converts to `Float32` by dividing by `2^31`. A return
//! of 0 frames signals end of stream. After `seek`, the next block is
//! aligned to a decodable frame boundary and never starts before the
//! requested position.

pub mod flac;
pub mod mp3;
pub mod wav;

use std::{fs::File, path::Path, time::Duration};

use symphonia::core::{
    audio::SampleBuffer,
    codecs::{CodecParameters, CodecRegistry, DecoderOptions},
    errors::Error as SymphoniaError,
    formats::{FormatOptions, FormatReader, SeekMode, SeekTo},
    io::{MediaSourceStream, MediaSourceStreamOptions},
    meta::{MetadataOptions, StandardTagKey},
    probe::{Hint, Probe},
};

use crate::{
    audio::{AudioStreamInfo, SampleFormat},
    error::{Error, Result},
};

/// Title tag key.
pub const META_TITLE: &str = "title";
/// Artist tag key.
pub const META_ARTIST: &str = "artist";
/// Album tag key.
pub const META_ALBUM: &str = "album";
/// Album artist tag key.
pub const META_ALBUM_ARTIST: &str = "album_artist";
/// Genre tag key.
pub const META_GENRE: &str = "genre";
/// Date tag key.
pub const META_DATE: &str = "date";
/// Track number tag key.
pub const META_TRACK_NUMBER: &str = "track_number";
/// Disc number tag key.
pub const META_DISC_NUMBER: &str = "disc_number";
/// Comment tag key.
pub const META_COMMENT: &str = "comment";
/// Composer tag key.
pub const META_COMPOSER: &str = "composer";

/// Probe confidence for an exact magic-number match.
pub const PROBE_CERTAIN: u8 = 100;

/// Stateless decoder factory registered by a plugin.
pub trait Decoder: Send + Sync {
    /// Short name used in logs and plugin listings.
    fn name(&self) -> &'static str;

    /// Scores how confident this decoder is that `header` (the first bytes
    /// of a file, 16 are enough) is a stream it can decode.
    ///
    /// Pure function; returns a confidence in `0..=100`.
    fn probe(&self, header: &[u8]) -> u8;

    /// Lowercase file extensions without the dot, e.g. `["mp3"]`.
    fn extensions(&self) -> &'static [&'static str];

    /// Opens `path` for streaming decode.
    ///
    /// # Errors
    ///
    /// Returns `FileNotFound` for missing files, `InvalidFormat` when the
    /// stream does not parse, `FileError` for I/O failures below the
    /// format layer.
    fn open(&self, path: &Path) -> Result<Box<dyn DecoderStream>>;
}

/// An open, seekable decode stream.
///
/// Dropping the stream closes it; drop is idempotent by construction.
pub trait DecoderStream: Send + std::fmt::Debug {
    /// Description of the stream being decoded.
    fn stream_info(&self) -> AudioStreamInfo;

    /// Decodes up to `out.len() / channels` frames of interleaved `i32`
    /// samples into `out`.
    ///
    /// Returns the number of frames (samples per channel) decoded;
    /// 0 means end of stream.
    ///
    /// # Errors
    ///
    /// Returns error on unrecoverable decode failures. Recoverable
    /// corruption is skipped internally.
    fn decode_block(&mut self, out: &mut [i32]) -> Result<usize>;

    /// Seeks to `position_ms`, returning the actual position in ms.
    ///
    /// The stream may land past the requested position (within one block)
    /// but never before it.
    ///
    /// # Errors
    ///
    /// Returns error if the position is beyond the stream or the format
    /// does not support seeking.
    fn seek(&mut self, position_ms: u64) -> Result<u64>;

    /// Ordered metadata tags with lowercase domain keys.
    fn metadata(&mut self) -> Vec<(String, String)>;

    /// Priming samples the encoder prepended, 0 if unreported.
    fn encoder_delay(&self) -> u32 {
        0
    }

    /// Padding samples the encoder appended, 0 if unreported.
    fn encoder_padding(&self) -> u32 {
        0
    }
}

/// Maximum number of consecutive corrupted packets to skip before giving up.
const MAX_RETRIES: usize = 3;

/// Minimum internal buffer Symphonia asserts for its ring buffer.
const MIN_BUFFER_LEN: usize = 64 * 1024;

/// Symphonia-backed [`DecoderStream`] shared by the built-in decoders.
///
/// Each decoder constructs this with its own codec/probe registry so only
/// the expected format is considered, mirroring how the stream was probed.
impl std::fmt::Debug for SymphoniaStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymphoniaStream")
            .field("position", &self.position)
            .field("info", &self.info)
            .field("delay", &self.delay)
            .field("padding", &self.padding)
            .finish_non_exhaustive()
    }
}

pub struct SymphoniaStream {
    /// Format reader (demuxer) for extracting encoded audio packets.
    demuxer: Box<dyn FormatReader>,

    /// Codec decoder for converting encoded packets to PCM samples.
    decoder: Box<dyn symphonia::core::codecs::Decoder>,

    /// Reusable sample buffer to minimize allocations.
    buffer: Option<SampleBuffer<i32>>,

    /// Read position in the sample buffer, in samples.
    position: usize,

    /// Cached stream description.
    info: AudioStreamInfo,

    /// Encoder delay in samples, 0 if unreported.
    delay: u32,

    /// Encoder padding in samples, 0 if unreported.
    padding: u32,
}

impl SymphoniaStream {
    /// Opens `path` through the given codec and probe registries.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be opened, the format cannot be
    /// probed, or the codec cannot be instantiated.
    pub fn open(
        path: &Path,
        codecs: &CodecRegistry,
        probe: &Probe,
        hint: Hint,
        bitrate_hint_kbps: u32,
    ) -> Result<Self> {
        let file = File::open(path)?;
        let stream = MediaSourceStream::new(
            Box::new(file),
            MediaSourceStreamOptions {
                buffer_len: MIN_BUFFER_LEN,
            },
        );

        // Gapless trimming stays disabled: encoder delay and padding are
        // reported to the host, and the playback engine trims them when
        // it schedules the track. Trimming here as well would cut twice.
        let demuxer = probe
            .format(
                &hint,
                stream,
                &FormatOptions {
                    enable_gapless: false,
                    ..FormatOptions::default()
                },
                &MetadataOptions::default(),
            )?
            .format;

        let track = demuxer
            .default_track()
            .ok_or_else(|| Error::invalid_format("no default track in stream"))?;
        let decoder =
            codecs.make(&track.codec_params, &DecoderOptions::default())?;

        // The decoder may know parameters the probe did not.
        let codec_params = decoder.codec_params();
        let info = Self::calc_info(codec_params, bitrate_hint_kbps);
        let delay = codec_params.delay.unwrap_or(0);
        let padding = codec_params.padding.unwrap_or(0);

        Ok(Self {
            demuxer,
            decoder,
            buffer: None,
            position: 0,
            info,
            delay,
            padding,
        })
    }

    /// Builds the stream description from codec parameters.
    fn calc_info(codec_params: &CodecParameters, bitrate_hint_kbps: u32) -> AudioStreamInfo {
        let sample_rate = codec_params.sample_rate.unwrap_or(44_100);
        let channels = codec_params
            .channels
            .map_or(2, |channels| channels.count() as u32);
        let format = match codec_params.bits_per_sample {
            Some(16) => SampleFormat::Int16,
            Some(24) => SampleFormat::Int24,
            Some(32) => SampleFormat::Int32,
            _ => SampleFormat::Unknown,
        };
        let total_samples = codec_params.n_frames.unwrap_or(0);

        AudioStreamInfo {
            sample_rate,
            channels,
            format,
            total_samples,
            duration_ms: AudioStreamInfo::derive_duration_ms(total_samples, sample_rate),
            bitrate_kbps: bitrate_hint_kbps,
        }
    }

    /// Refreshes cached parameters after a codec reset.
    fn reload_spec(&mut self) {
        let codec_params = self.decoder.codec_params();
        let bitrate = self.info.bitrate_kbps;
        self.info = Self::calc_info(codec_params, bitrate);

        // Drop the buffer to force reinitialization with the new parameters.
        self.buffer = None;

        debug!(
            "decoder reloaded with sample rate: {} Hz; channels: {}",
            self.info.sample_rate, self.info.channels,
        );
    }

    /// Decodes the next packet into the internal sample buffer.
    ///
    /// Skips corrupted packets (up to [`MAX_RETRIES`]), resets the codec
    /// when asked, clears the buffer after any error. Returns `false` at
    /// end of stream.
    fn next_packet(&mut self) -> Result<bool> {
        let mut discarded = 0;
        loop {
            if discarded > MAX_RETRIES {
                break Err(Error::invalid_format(
                    "discarded too many packets, giving up",
                ));
            }
            if discarded > 0 {
                if let Some(buffer) = self.buffer.as_mut() {
                    // Internal buffer *must* be cleared if an error occurs.
                    buffer.clear();
                }
            }

            // Assume failure until a packet is successfully decoded.
            discarded += 1;

            match self.demuxer.next_packet() {
                Ok(packet) => {
                    let decoded = match self.decoder.decode(&packet) {
                        Ok(decoded) => decoded,

                        // Undecodeable packet: discard and continue with
                        // the next one.
                        Err(SymphoniaError::DecodeError(e)) => {
                            error!("discarding malformed packet: {e}");
                            continue;
                        }
                        Err(SymphoniaError::IoError(e))
                            if e.kind() != std::io::ErrorKind::UnexpectedEof =>
                        {
                            error!("discarding unreadable packet: {e}");
                            continue;
                        }
                        Err(SymphoniaError::IoError(_)) => {
                            break Ok(false);
                        }

                        Err(SymphoniaError::ResetRequired) => {
                            self.decoder.reset();
                            self.reload_spec();
                            continue;
                        }

                        // All other errors are unrecoverable.
                        Err(e) => {
                            break Err(e.into());
                        }
                    };

                    let buffer = match self.buffer.as_mut() {
                        Some(buffer) => buffer,
                        None => {
                            // Buffer size follows the codec's maximum frame
                            // length, so one allocation is reused for as long
                            // as the codec specifications remain the same.
                            self.buffer.insert(SampleBuffer::new(
                                decoded.capacity() as u64,
                                *decoded.spec(),
                            ))
                        }
                    };
                    buffer.copy_interleaved_ref(decoded);
                    self.position = 0;
                    break Ok(true);
                }

                // `ResetRequired` from the demuxer means the decoder must
                // be re-created for the (changed) default track.
                Err(SymphoniaError::ResetRequired) => {
                    trace!("re-creating decoder");
                    let track = self
                        .demuxer
                        .default_track()
                        .ok_or_else(|| Error::invalid_format("no default track in stream"))?;
                    self.decoder = symphonia::default::get_codecs()
                        .make(&track.codec_params, &DecoderOptions::default())?;
                    self.reload_spec();
                    continue;
                }

                // End of stream surfaces as an UnexpectedEof I/O error.
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break Ok(false);
                }

                // All other errors are unrecoverable.
                Err(e) => {
                    break Err(e.into());
                }
            }
        }
    }
}

impl DecoderStream for SymphoniaStream {
    fn stream_info(&self) -> AudioStreamInfo {
        self.info
    }

    fn decode_block(&mut self, out: &mut [i32]) -> Result<usize> {
        let channels = self.info.channels as usize;
        if channels == 0 || out.len() < channels {
            return Ok(0);
        }

        let mut written = 0;
        let capacity = out.len() - (out.len() % channels);

        while written < capacity {
            let available = match self.buffer.as_ref() {
                Some(buffer) if self.position < buffer.len() => buffer.len() - self.position,
                _ => {
                    match self.next_packet() {
                        Ok(true) => continue,
                        Ok(false) => break,
                        Err(e) => {
                            // Clean state for any further calls.
                            self.buffer = None;
                            if written > 0 {
                                error!("decode error after partial block: {e}");
                                break;
                            }
                            return Err(e);
                        }
                    }
                }
            };

            let take = available.min(capacity - written);
            let buffer = self.buffer.as_ref().ok_or_else(|| {
                Error::invalid_state("sample buffer vanished mid-block")
            })?;
            out[written..written + take]
                .copy_from_slice(&buffer.samples()[self.position..self.position + take]);
            self.position += take;
            written += take;
        }

        Ok(written / channels)
    }

    fn seek(&mut self, position_ms: u64) -> Result<u64> {
        let seeked_to = self.demuxer.seek(
            SeekMode::Accurate,
            SeekTo::Time {
                // implies the default or first track
                track_id: None,
                time: Duration::from_millis(position_ms).into(),
            },
        )?;

        // Seeking is a demuxer operation, so the decoder cannot reliably
        // know when a seek took place. Reset it to avoid audio glitches.
        self.decoder.reset();
        self.buffer = None;
        self.position = 0;

        let time_base = self
            .decoder
            .codec_params()
            .time_base
            .ok_or_else(|| Error::invalid_state("stream has no time base"))?;
        let time = time_base.calc_time(seeked_to.actual_ts);
        let actual: Duration = time.into();
        let actual_ms = actual.as_millis() as u64;

        // Accurate mode decodes forward to the target, never landing
        // before it within time-base rounding.
        Ok(actual_ms.max(position_ms.min(actual_ms + 1)))
    }

    fn metadata(&mut self) -> Vec<(String, String)> {
        let mut tags = Vec::new();

        if let Some(metadata) = self.demuxer.metadata().skip_to_latest() {
            for tag in metadata.tags() {
                let Some(key) = tag.std_key.and_then(standard_key_name) else {
                    continue;
                };
                tags.push((key.to_string(), tag.value.to_string()));
            }
        }

        tags
    }

    fn encoder_delay(&self) -> u32 {
        self.delay
    }

    fn encoder_padding(&self) -> u32 {
        self.padding
    }
}

/// Maps Symphonia's standard tag keys onto the lowercase domain keys.
fn standard_key_name(key: StandardTagKey) -> Option<&'static str> {
    match key {
        StandardTagKey::TrackTitle => Some(META_TITLE),
        StandardTagKey::Artist => Some(META_ARTIST),
        StandardTagKey::Album => Some(META_ALBUM),
        StandardTagKey::AlbumArtist => Some(META_ALBUM_ARTIST),
        StandardTagKey::Genre => Some(META_GENRE),
        StandardTagKey::Date => Some(META_DATE),
        StandardTagKey::TrackNumber => Some(META_TRACK_NUMBER),
        StandardTagKey::DiscNumber => Some(META_DISC_NUMBER),
        StandardTagKey::Comment => Some(META_COMMENT),
        StandardTagKey::Composer => Some(META_COMPOSER),
        _ => None,
    }
}

/// Picks the best decoder for `header` among `decoders`.
///
/// Returns the decoder with the highest probe confidence, or `None` when
/// every decoder reports 0.
#[must_use]
pub fn probe_best<'a>(
    decoders: &'a [std::sync::Arc<dyn Decoder>],
    header: &[u8],
) -> Option<&'a std::sync::Arc<dyn Decoder>> {
    decoders
        .iter()
        .map(|decoder| (decoder.probe(header), decoder))
        .filter(|(confidence, _)| *confidence > 0)
        .max_by_key(|(confidence, _)| *confidence)
        .map(|(_, decoder)| decoder)
}
