//! Gapless audio playback engine with adaptive resampling.
//!
//! **crescendo** is a library and headless application built around a
//! real-time audio pipeline: decode audio streams from multiple
//! container/codec formats, run a configurable DSP chain, and deliver
//! continuous PCM to a platform audio endpoint without underruns on the
//! audio callback thread. It provides:
//!
//! # Core Features
//!
//! * **Gapless Playback**: dual-decoder scheduling hands tracks over
//!   sample-exact, with a short crossfade across format changes
//! * **Format Support**: WAV, MP3 and FLAC decoders, extensible through
//!   plugins
//! * **Adaptive Resampling**: linear/cubic/sinc converter family with
//!   automatic quality selection under CPU pressure
//! * **DSP Chain**: ten-band graphic equalizer and volume stage
//! * **Visualization**: waveform, FFT spectrum and VU meter taps fed
//!   from the audio thread
//!
//! # Architecture
//!
//! The library is organized into several key modules:
//!
//! * **Audio Pipeline**
//!   - [`decoder`]: streaming decode/seek/metadata contract and the
//!     bundled Symphonia-backed decoders
//!   - [`resample`]: sample-rate conversion family and the adaptive
//!     selector
//!   - [`dsp`]: the processing chain and its stages
//!   - [`engine`]: the dual-decoder playback engine and real-time mixer
//!   - [`output`]: the pull-model output contract and cpal backend
//!   - [`visualize`]: waveform/spectrum/VU data products
//!
//! * **Plugin System**
//!   - [`plugin`]: plugin contract and C ABI
//!   - [`host`]: dynamic discovery and lifecycle
//!   - [`builtin`]: the bundled plugin set
//!   - [`registry`]: hashed service ids and the service registry
//!
//! * **Infrastructure**
//!   - [`core`]: construction and teardown of the whole system
//!   - [`bus`]: asynchronous event fan-out
//!   - [`config`]: sectioned JSON settings store
//!   - [`events`]: playback event definitions
//!   - [`error`]: error types and handling
//!   - [`audio`], [`track`], [`util`]: shared types and helpers
//!
//! # Example
//!
//! ```rust,no_run
//! use crescendo::core::{CoreEngine, CoreOptions};
//!
//! fn example() -> crescendo::error::Result<()> {
//!     let core = CoreEngine::initialize(CoreOptions::default())?;
//!     core.play_file(std::path::Path::new("track.flac"))?;
//!     Ok(())
//! }
//! ```
//!
//! # Concurrency
//!
//! The control surface runs on the caller's thread; the output backend
//! owns a real-time callback thread that must never block. See the
//! [`engine`] module for the full threading contract.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![doc(test(attr(ignore)))]

#[macro_use]
extern crate log;

pub mod audio;
pub mod builtin;
pub mod bus;
pub mod config;
pub mod core;
pub mod decoder;
pub mod dsp;
pub mod engine;
pub mod error;
pub mod events;
pub mod host;
pub mod output;
pub mod plugin;
pub mod registry;
pub mod resample;
pub mod track;
pub mod util;
pub mod visualize;
