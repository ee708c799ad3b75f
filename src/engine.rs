//! Playback engine: dual-decoder gapless scheduler and real-time mixer.
//!
//! # Architecture
//!
//! Two pre-allocated decoder slots enable gapless handover: while slot A
//! plays, `prepare_next_track` fills slot B, and when A runs out inside
//! the audio callback the engine switches slots and keeps filling the
//! same output buffer. Matching `(sample_rate, channels)` hand over
//! sample-exact; mismatched formats get a 50 ms linear crossfade.
//!
//! # Threads
//!
//! * The **control thread** drives the public API under one engine mutex.
//! * The **audio callback thread** (owned by the output backend) runs
//!   [`fill_buffer`]: it never blocks on a held mutex (`try_lock`, silence
//!   on contention), never allocates on the hot path, and degrades to
//!   `Stopped` instead of erroring.
//!
//! The control thread calls `output.stop()` — which joins the callback —
//! before any structural mutation of the current slot, so the callback
//! always observes stable slot state while running. Dropped decoder
//! streams from inline transitions are parked in a graveyard and released
//! by the next control-thread call rather than inside the callback.
//!
//! # Sample production per callback
//!
//! 1. Zero the output buffer; bail with silence unless `Playing`.
//! 2. Decode interleaved `i32` blocks from the current slot and convert
//!    to `Float32` (divide by `2^31`).
//! 3. Adapt channels, then resample to the negotiated output rate.
//! 4. On end of stream, transition inline when a next slot is prepared,
//!    otherwise zero-fill and degrade to `Stopped`.
//! 5. Run the DSP chain, feed the visualization tap, apply gain last.

use std::{
    path::Path,
    sync::{
        atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering},
        Arc, Mutex,
    },
};

use crate::{
    audio::{AudioBuffer, SampleFormat},
    bus::EventBus,
    decoder::{Decoder, DecoderStream},
    dsp::{DspChain, DspConfig},
    error::{Error, Result},
    events::Event,
    output::{AudioOutput, AudioOutputConfig, NegotiatedFormat},
    resample::{adaptive::AdaptiveConverter, ResampleQuality, SampleRateConverter},
    track::TrackInfo,
    visualize::VisualizationEngine,
};

/// Remaining-time threshold under which the host should prepare the next
/// track to avoid starvation at the seam.
pub const PREBUFFER_THRESHOLD_MS: u64 = 5_000;

/// Crossfade length for transitions between mismatched formats.
pub const CROSSFADE_DURATION_MS: u32 = 50;

/// Default buffer size requested from the output backend.
///
/// 1024 frames at 48 kHz is ~21 ms: enough headroom for worst-case
/// decode latency inside one callback.
pub const DEFAULT_BUFFER_FRAMES: u32 = 1024;

/// Most channels the engine will mix.
const MAX_CHANNELS: usize = 8;

/// Largest decode chunk per inner loop iteration, in frames.
const DECODE_CHUNK_FRAMES: usize = 4096;

/// Scale factor from full-range `i32` samples to `Float32`.
const INT32_SCALE: f32 = 1.0 / 2_147_483_648.0;

/// Playback states.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum PlaybackState {
    /// No audio device open, no track playing.
    Stopped = 0,
    /// The callback is producing audio.
    Playing = 1,
    /// The device is open but the callback is not running.
    Paused = 2,
    /// An inline gapless handover is in progress.
    Transitioning = 3,
}

impl PlaybackState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Playing,
            2 => Self::Paused,
            3 => Self::Transitioning,
            _ => Self::Stopped,
        }
    }
}

/// One of the two decoder slots.
#[derive(Default)]
struct DecoderSlot {
    stream: Option<Box<dyn DecoderStream>>,
    info: crate::audio::AudioStreamInfo,
    track: TrackInfo,
    /// Playback position in samples at the track rate.
    position_samples: u64,
    /// Head samples still to discard (encoder delay trim).
    skip_samples: u64,
    active: bool,
    eos: bool,
}

impl DecoderSlot {
    fn clear(&mut self) -> Option<Box<dyn DecoderStream>> {
        let stream = self.stream.take();
        *self = Self::default();
        stream
    }

    fn is_loaded(&self) -> bool {
        self.stream.is_some()
    }
}

/// Mutable engine state shared between control thread and callback.
struct EngineCore {
    slots: [DecoderSlot; 2],
    current: usize,
    next: Option<usize>,

    /// Output format negotiated at `play`.
    out_rate: u32,
    out_channels: usize,

    converter: AdaptiveConverter,
    /// True while the current slot needs resampling.
    resampling: bool,

    dsp: DspChain,
    visualization: Option<Arc<VisualizationEngine>>,

    /// Decoded `i32` scratch, preallocated at `play`.
    decode_buf: Vec<i32>,
    /// Float conversion scratch at the slot's channel count.
    float_buf: Vec<f32>,
    /// Channel-adapted scratch at the output channel count.
    chan_buf: Vec<f32>,
    /// Resampler output scratch.
    resampled: Vec<f32>,
    /// Frames queued for the output, already at the output format.
    pending: Vec<f32>,
    /// Mix buffer handed to the DSP chain.
    mix: AudioBuffer,

    /// Remaining crossfade fade-in samples on the new slot.
    crossfade_remaining: usize,
    crossfade_total: usize,

    /// First buffer after a seek resets the DSP chain.
    pending_discontinuity: bool,

    /// Streams retired by inline transitions, dropped by the control
    /// thread so the callback never touches the filesystem.
    graveyard: Vec<Box<dyn DecoderStream>>,
}

impl EngineCore {
    fn new() -> Self {
        Self {
            slots: [DecoderSlot::default(), DecoderSlot::default()],
            current: 0,
            next: None,
            out_rate: 0,
            out_channels: 0,
            converter: AdaptiveConverter::new(
                ResampleQuality::Fast,
                ResampleQuality::Best,
                80.0,
            ),
            resampling: false,
            dsp: DspChain::new(),
            visualization: None,
            decode_buf: Vec::new(),
            float_buf: Vec::new(),
            chan_buf: Vec::new(),
            resampled: Vec::new(),
            pending: Vec::new(),
            mix: AudioBuffer::default(),
            crossfade_remaining: 0,
            crossfade_total: 0,
            pending_discontinuity: false,
            graveyard: Vec::new(),
        }
    }

    /// Installs an opened stream into slot `index`.
    fn install(
        &mut self,
        index: usize,
        stream: Box<dyn DecoderStream>,
        path: &Path,
    ) -> crate::audio::AudioStreamInfo {
        let info = stream.stream_info();
        let mut track = TrackInfo::new(path, info.total_samples);
        track.encoder_delay_samples = stream.encoder_delay();
        track.encoder_padding_samples = stream.encoder_padding();

        let slot = &mut self.slots[index];
        if let Some(old) = slot.clear() {
            drop(old);
        }
        slot.stream = Some(stream);
        slot.info = info;
        slot.skip_samples = u64::from(track.encoder_delay_samples);
        slot.track = track;

        info
    }

    /// Prepares the resampler and scratch buffers for the current slot
    /// against the negotiated output format.
    fn configure_pipeline(&mut self, max_frames: usize) -> Result<()> {
        let info = self.slots[self.current].info;
        let in_channels = info.channels as usize;
        if in_channels == 0 || in_channels > MAX_CHANNELS {
            return Err(Error::not_supported(format!(
                "{in_channels} channels exceed the mixer limit"
            )));
        }

        self.resampling = info.sample_rate != self.out_rate;
        if self.resampling {
            self.converter
                .initialize(info.sample_rate, self.out_rate, self.out_channels as u32)?;
        }

        // All hot-path buffers are sized here, on the control thread.
        self.decode_buf
            .resize(DECODE_CHUNK_FRAMES * MAX_CHANNELS, 0);
        self.float_buf
            .resize(DECODE_CHUNK_FRAMES * MAX_CHANNELS, 0.0);
        self.chan_buf
            .resize(DECODE_CHUNK_FRAMES * self.out_channels, 0.0);
        self.resampled
            .resize((max_frames + 64) * self.out_channels, 0.0);
        self.pending.clear();
        self.pending
            .reserve((2 * max_frames + 64) * self.out_channels);
        if self.mix.capacity < max_frames || self.mix.channels as usize != self.out_channels {
            self.mix =
                AudioBuffer::with_capacity(max_frames, self.out_channels as u32, self.out_rate);
        }

        Ok(())
    }
}

/// Atomics and handles read from the callback without the core lock.
struct EngineShared {
    state: AtomicU8,
    volume_bits: AtomicU32,
    gapless: AtomicBool,
    initialized: AtomicBool,
    /// Current-slot position in samples at the track rate.
    position_samples: AtomicU64,
    /// Current-slot sample rate, for position math.
    sample_rate: AtomicU32,
    /// Current-slot duration in ms.
    duration_ms: AtomicU64,
    bus: Mutex<Option<Arc<EventBus>>>,
}

impl EngineShared {
    fn state(&self) -> PlaybackState {
        PlaybackState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: PlaybackState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn publish(&self, event: Event) {
        // try_lock keeps the callback free of blocking; a missed event
        // during a bus swap is tolerable.
        if let Ok(guard) = self.bus.try_lock() {
            if let Some(bus) = guard.as_ref() {
                bus.publish(event);
            }
        }
    }
}

/// Gapless dual-decoder playback engine.
pub struct PlaybackEngine {
    core: Arc<Mutex<EngineCore>>,
    shared: Arc<EngineShared>,
    output: Mutex<Option<Box<dyn AudioOutput>>>,
    negotiated: Mutex<Option<NegotiatedFormat>>,
}

impl PlaybackEngine {
    /// Creates an uninitialized engine.
    #[must_use]
    pub fn new() -> Self {
        Self {
            core: Arc::new(Mutex::new(EngineCore::new())),
            shared: Arc::new(EngineShared {
                state: AtomicU8::new(PlaybackState::Stopped as u8),
                volume_bits: AtomicU32::new(1.0_f32.to_bits()),
                gapless: AtomicBool::new(true),
                initialized: AtomicBool::new(false),
                position_samples: AtomicU64::new(0),
                sample_rate: AtomicU32::new(0),
                duration_ms: AtomicU64::new(0),
                bus: Mutex::new(None),
            }),
            output: Mutex::new(None),
            negotiated: Mutex::new(None),
        }
    }

    /// Takes ownership of the audio output backend.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyInitialized` when called twice.
    pub fn initialize(&self, output: Box<dyn AudioOutput>) -> Result<()> {
        let mut guard = self.output.lock()?;
        if self.shared.initialized.load(Ordering::Acquire) {
            return Err(Error::already_initialized("playback engine"));
        }
        *guard = Some(output);
        self.shared.initialized.store(true, Ordering::Release);
        Ok(())
    }

    /// Attaches the event bus for state notifications.
    pub fn attach_event_bus(&self, bus: Arc<EventBus>) -> Result<()> {
        *self.shared.bus.lock()? = Some(bus);
        Ok(())
    }

    /// Attaches the visualization engine fed from the audio callback.
    pub fn attach_visualization(&self, visualization: Arc<VisualizationEngine>) -> Result<()> {
        self.core.lock()?.visualization = Some(visualization);
        Ok(())
    }

    /// Runs `f` against the DSP chain under the engine lock.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the engine mutex is poisoned.
    pub fn with_dsp_chain<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut DspChain) -> R,
    {
        let mut core = self.core.lock()?;
        Ok(f(&mut core.dsp))
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.shared.initialized.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(Error::not_initialized("playback engine"))
        }
    }

    /// Loads a track into the current slot. Only legal while `Stopped`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` outside `Stopped`, or the decoder's open
    /// error.
    pub fn load_track(&self, path: &Path, decoder: &Arc<dyn Decoder>) -> Result<()> {
        self.ensure_initialized()?;
        if self.shared.state() != PlaybackState::Stopped {
            return Err(Error::invalid_state("load_track requires Stopped"));
        }

        // Decoder open touches the filesystem: do it before locking.
        let stream = decoder.open(path)?;

        let mut core = self.core.lock()?;
        core.graveyard.clear();
        let current = core.current;
        let info = core.install(current, stream, path);
        core.next = None;
        drop(core);

        self.shared.position_samples.store(0, Ordering::Release);
        self.shared
            .sample_rate
            .store(info.sample_rate, Ordering::Release);
        self.shared
            .duration_ms
            .store(info.duration_ms, Ordering::Release);

        info!(
            "loaded track: {} ({} Hz, {} channels, {} ms)",
            path.display(),
            info.sample_rate,
            info.channels,
            info.duration_ms
        );
        self.shared.publish(Event::TrackLoaded);
        Ok(())
    }

    /// Prepares the non-current slot for a gapless transition.
    ///
    /// Legal while playing; the callback picks the slot up when the
    /// current track ends.
    ///
    /// # Errors
    ///
    /// Returns `NotInitialized` before `initialize`, `InvalidState` when
    /// no current track is loaded, or the decoder's open error.
    pub fn prepare_next_track(&self, path: &Path, decoder: &Arc<dyn Decoder>) -> Result<()> {
        self.ensure_initialized()?;

        let stream = decoder.open(path)?;

        let mut core = self.core.lock()?;
        core.graveyard.clear();
        if !core.slots[core.current].is_loaded() {
            return Err(Error::invalid_state("no current track to follow"));
        }

        let next_index = 1 - core.current;
        core.install(next_index, stream, path);
        core.next = Some(next_index);
        drop(core);

        info!("prepared next track: {}", path.display());
        Ok(())
    }

    /// Starts or resumes playback.
    ///
    /// From `Stopped` this opens the output (negotiating the format) and
    /// starts the callback; from `Paused` it restarts the callback.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` when no track is loaded, or the backend's
    /// open/start error. The engine stays `Stopped` on failure.
    pub fn play(&self) -> Result<()> {
        self.ensure_initialized()?;

        match self.shared.state() {
            PlaybackState::Playing => return Ok(()),
            PlaybackState::Paused => {
                let mut output = self.output.lock()?;
                let output = output
                    .as_mut()
                    .ok_or_else(|| Error::invalid_state("no audio output"))?;
                output.start()?;
                self.shared.set_state(PlaybackState::Playing);
                self.shared.publish(Event::Play);
                return Ok(());
            }
            PlaybackState::Stopped | PlaybackState::Transitioning => {}
        }

        let (info, requested_channels) = {
            let core = self.core.lock()?;
            let slot = &core.slots[core.current];
            if !slot.is_loaded() {
                return Err(Error::invalid_state("no track loaded"));
            }
            (slot.info, slot.info.channels.clamp(1, 2))
        };

        // The output may still be open if the callback degraded to
        // Stopped at end of stream; reuse the negotiated format then.
        let already_negotiated = *self.negotiated.lock()?;
        let negotiated = match already_negotiated {
            Some(negotiated) => negotiated,
            None => {
                let mut output = self.output.lock()?;
                let output = output
                    .as_mut()
                    .ok_or_else(|| Error::invalid_state("no audio output"))?;

                let callback =
                    Self::make_callback(Arc::clone(&self.core), Arc::clone(&self.shared));
                let negotiated = output.open(AudioOutputConfig {
                    device_id: None,
                    sample_rate: info.sample_rate,
                    channels: requested_channels,
                    format: SampleFormat::Float32,
                    buffer_frames: DEFAULT_BUFFER_FRAMES,
                    callback,
                })?;
                *self.negotiated.lock()? = Some(negotiated);
                negotiated
            }
        };

        {
            let mut core = self.core.lock()?;
            core.out_rate = negotiated.sample_rate;
            core.out_channels = negotiated.channels as usize;
            core.configure_pipeline(negotiated.buffer_frames as usize)?;

            let out_rate = core.out_rate;
            let channels = core.out_channels as u32;
            core.dsp.initialize(DspConfig {
                sample_rate: out_rate,
                channels,
                format: SampleFormat::Float32,
                max_buffer_frames: negotiated.buffer_frames as usize,
            })?;

            let current = core.current;
            core.slots[current].active = true;
            core.slots[current].eos = false;
        }

        self.shared.set_state(PlaybackState::Playing);
        if let Err(e) = self
            .output
            .lock()?
            .as_mut()
            .ok_or_else(|| Error::invalid_state("no audio output"))?
            .start()
        {
            self.shared.set_state(PlaybackState::Stopped);
            let mut core = self.core.lock()?;
            let current = core.current;
            core.slots[current].active = false;
            return Err(e);
        }

        debug!("playback started");
        self.shared.publish(Event::Play);
        Ok(())
    }

    /// Pauses playback. A no-op outside `Playing`.
    ///
    /// # Errors
    ///
    /// Returns the backend's stop error.
    pub fn pause(&self) -> Result<()> {
        self.ensure_initialized()?;
        if self.shared.state() != PlaybackState::Playing {
            return Ok(());
        }

        self.output
            .lock()?
            .as_mut()
            .ok_or_else(|| Error::invalid_state("no audio output"))?
            .stop()?;
        self.shared.set_state(PlaybackState::Paused);

        debug!("playback paused");
        self.shared.publish(Event::Pause);
        Ok(())
    }

    /// Stops playback, closes the output and releases both slots.
    ///
    /// # Errors
    ///
    /// Returns `NotInitialized` before `initialize`.
    pub fn stop(&self) -> Result<()> {
        self.ensure_initialized()?;
        if self.shared.state() == PlaybackState::Stopped {
            return Ok(());
        }

        {
            let mut output = self.output.lock()?;
            if let Some(output) = output.as_mut() {
                let _ = output.stop();
                output.close();
            }
        }
        *self.negotiated.lock()? = None;

        self.release_slots()?;
        self.shared.set_state(PlaybackState::Stopped);
        self.shared.position_samples.store(0, Ordering::Release);

        debug!("playback stopped");
        self.shared.publish(Event::Stopped);
        Ok(())
    }

    fn release_slots(&self) -> Result<()> {
        let mut core = self.core.lock()?;
        core.graveyard.clear();
        for slot in &mut core.slots {
            slot.clear();
        }
        core.next = None;
        core.pending.clear();
        core.crossfade_remaining = 0;
        Ok(())
    }

    /// Seeks the current track to `position_ms`.
    ///
    /// Control-thread only: stops the callback, seeks, restarts. The
    /// first post-seek buffer is a discontinuity and resets the DSP
    /// chain.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` when no track is loaded, or the decoder's
    /// seek error.
    pub fn seek(&self, position_ms: u64) -> Result<u64> {
        self.ensure_initialized()?;

        let was_playing = self.shared.state() == PlaybackState::Playing;
        if was_playing {
            self.output
                .lock()?
                .as_mut()
                .ok_or_else(|| Error::invalid_state("no audio output"))?
                .stop()?;
        }

        let actual_ms = {
            let mut core = self.core.lock()?;
            let core = &mut *core;
            core.graveyard.clear();
            let current = core.current;
            let slot = &mut core.slots[current];
            let stream = slot
                .stream
                .as_mut()
                .ok_or_else(|| Error::invalid_state("no track loaded"))?;

            let actual_ms = stream.seek(position_ms)?;
            slot.position_samples =
                actual_ms * u64::from(slot.info.sample_rate) / 1000;
            slot.skip_samples = 0;
            slot.eos = false;

            let position = slot.position_samples;
            core.pending.clear();
            core.pending_discontinuity = true;
            if core.resampling {
                core.converter.reset();
            }
            self.shared
                .position_samples
                .store(position, Ordering::Release);
            actual_ms
        };

        if was_playing {
            self.output
                .lock()?
                .as_mut()
                .ok_or_else(|| Error::invalid_state("no audio output"))?
                .start()?;
        }

        debug!("seeked to {actual_ms} ms");
        self.shared.publish(Event::Seeked);
        Ok(actual_ms)
    }

    /// Current playback position in milliseconds.
    #[must_use]
    pub fn get_position(&self) -> u64 {
        let rate = self.shared.sample_rate.load(Ordering::Acquire);
        if rate == 0 || self.shared.state() == PlaybackState::Stopped {
            return 0;
        }
        self.shared.position_samples.load(Ordering::Acquire) * 1000 / u64::from(rate)
    }

    /// Duration of the current track in milliseconds.
    #[must_use]
    pub fn get_duration(&self) -> u64 {
        self.shared.duration_ms.load(Ordering::Acquire)
    }

    /// Current playback state.
    #[must_use]
    pub fn state(&self) -> PlaybackState {
        self.shared.state()
    }

    /// Sets the playback gain in `0.0..=1.0`.
    pub fn set_volume(&self, volume: f32) {
        let clamped = volume.clamp(0.0, 1.0);
        self.shared
            .volume_bits
            .store(clamped.to_bits(), Ordering::Release);
    }

    /// Current playback gain.
    #[must_use]
    pub fn volume(&self) -> f32 {
        f32::from_bits(self.shared.volume_bits.load(Ordering::Acquire))
    }

    /// Enables or disables gapless transitions.
    pub fn set_gapless(&self, enabled: bool) {
        self.shared.gapless.store(enabled, Ordering::Release);
    }

    /// True when less than [`PREBUFFER_THRESHOLD_MS`] of the current
    /// track remains; the host should prepare the next track.
    #[must_use]
    pub fn is_approaching_end(&self) -> bool {
        let rate = self.shared.sample_rate.load(Ordering::Acquire);
        let duration = self.shared.duration_ms.load(Ordering::Acquire);
        if rate == 0 || duration == 0 {
            return false;
        }
        let position_ms =
            self.shared.position_samples.load(Ordering::Acquire) * 1000 / u64::from(rate);
        duration.saturating_sub(position_ms) < PREBUFFER_THRESHOLD_MS
    }

    /// Shuts the engine down, stopping playback and dropping the output.
    pub fn shutdown(&self) {
        if self.shared.initialized.load(Ordering::Acquire) {
            let _ = self.stop();
            if let Ok(mut core) = self.core.lock() {
                core.dsp.shutdown();
            }
            if let Ok(mut output) = self.output.lock() {
                *output = None;
            }
            self.shared.initialized.store(false, Ordering::Release);
        }
    }

    /// Builds the pull callback handed to the output backend.
    fn make_callback(
        core: Arc<Mutex<EngineCore>>,
        shared: Arc<EngineShared>,
    ) -> crate::output::AudioCallback {
        Box::new(move |buffer: &mut [f32], frames: usize| {
            fill_buffer(&core, &shared, buffer, frames);
        })
    }
}

impl Default for PlaybackEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Real-time buffer fill. See the module docs for the contract.
fn fill_buffer(
    core: &Mutex<EngineCore>,
    shared: &EngineShared,
    buffer: &mut [f32],
    frames: usize,
) {
    buffer.fill(0.0);

    if shared.state() != PlaybackState::Playing {
        return;
    }

    // Never block the audio thread: contention means the control thread
    // is mutating engine state, and one silent buffer is the answer.
    let Ok(mut core) = core.try_lock() else {
        return;
    };
    let core = &mut *core;

    let channels = core.out_channels;
    if channels == 0 || !core.slots[core.current].is_loaded() {
        shared.set_state(PlaybackState::Stopped);
        return;
    }

    // A backend may deliver a larger callback than negotiated; the mix
    // buffer bounds how much of it can carry audio.
    let frames = frames.min(core.mix.capacity);

    // Produce into the pending queue until the buffer is covered or the
    // stream chain is exhausted.
    let needed = frames * channels;
    let mut stopped = false;
    while core.pending.len() < needed {
        let produced = produce_from_current(core, shared, frames);
        if produced == 0 {
            let current_eos = core.slots[core.current].eos;
            if current_eos
                && core.next.is_some()
                && shared.gapless.load(Ordering::Acquire)
            {
                transition_to_next(core, shared);
                continue;
            }
            if current_eos {
                stopped = true;
            }
            break;
        }
    }

    // Move pending samples into the mix buffer; deficit stays zero.
    let available = core.pending.len().min(needed);
    let out_frames = available / channels;
    core.mix.frames = frames;
    core.mix.sample_rate = core.out_rate;
    core.mix.discontinuity = core.pending_discontinuity;
    core.pending_discontinuity = false;
    core.mix.end_of_stream = stopped;
    core.mix.data[..available].copy_from_slice(&core.pending[..available]);
    core.mix.data[available..frames * channels].fill(0.0);
    core.pending.drain(..available);

    // DSP chain; failures degrade to silence rather than propagate.
    if let Err(e) = core.dsp.process(&mut core.mix) {
        error!("dsp failure, emitting silence: {e}");
        core.mix.data[..frames * channels].fill(0.0);
    }

    // Crossfade fade-in ramp on the freshly switched slot.
    if core.crossfade_remaining > 0 && core.crossfade_total > 0 {
        let total = core.crossfade_total;
        for frame in 0..out_frames {
            if core.crossfade_remaining == 0 {
                break;
            }
            #[expect(clippy::cast_precision_loss)]
            let ramp = (total - core.crossfade_remaining) as f32 / total as f32;
            for ch in 0..channels {
                core.mix.data[frame * channels + ch] *= ramp;
            }
            core.crossfade_remaining -= 1;
        }
    }

    // Gain last.
    let volume = f32::from_bits(shared.volume_bits.load(Ordering::Acquire));
    if (volume - 1.0).abs() > f32::EPSILON {
        for sample in &mut core.mix.data[..frames * channels] {
            *sample *= volume;
        }
    }

    // Visualization tap: non-blocking, drop-on-contention inside.
    if let Some(visualization) = core.visualization.as_ref() {
        visualization.process_audio(
            &core.mix.data[..frames * channels],
            frames,
            channels as u32,
            core.out_rate,
        );
    }

    buffer[..frames * channels].copy_from_slice(&core.mix.data[..frames * channels]);

    if stopped {
        let current = core.current;
        core.slots[current].active = false;
        shared.set_state(PlaybackState::Stopped);
        shared.publish(Event::Stopped);
    }
}

/// Decodes one chunk from the current slot into the pending queue.
///
/// Returns the number of output-rate frames appended; 0 at end of stream
/// or on decode failure (which marks the slot `eos`).
fn produce_from_current(core: &mut EngineCore, shared: &EngineShared, frames: usize) -> usize {
    let out_channels = core.out_channels;
    let current = core.current;

    let (in_rate, in_channels, effective_end) = {
        let slot = &core.slots[current];
        (
            slot.info.sample_rate,
            slot.info.channels as usize,
            slot.track.effective_end(),
        )
    };

    if core.slots[current].eos {
        return 0;
    }

    // Ask for roughly the input needed for the remaining output deficit,
    // but never so much that the conversion overruns its scratch.
    let deficit_frames = frames.saturating_sub(core.pending.len() / out_channels) + 1;
    let mut want = (deficit_frames as u64 * u64::from(in_rate))
        .div_ceil(u64::from(core.out_rate.max(1))) as usize
        + 4;
    let scratch_frames = core.resampled.len() / out_channels;
    let max_in = (scratch_frames.saturating_sub(8) as u64 * u64::from(in_rate)
        / u64::from(core.out_rate.max(1))) as usize;
    want = want.min(max_in.max(1)).clamp(1, DECODE_CHUNK_FRAMES);

    let slot = &mut core.slots[current];
    let stream = match slot.stream.as_mut() {
        Some(stream) => stream,
        None => {
            slot.eos = true;
            return 0;
        }
    };

    let decoded = match stream.decode_block(&mut core.decode_buf[..want * in_channels]) {
        Ok(decoded) => decoded,
        Err(e) => {
            // Runtime decode failure mid-track: treat as end of stream.
            error!("decode failure: {e}");
            slot.eos = true;
            return 0;
        }
    };
    if decoded == 0 {
        slot.eos = true;
        return 0;
    }

    // Head trim: discard encoder delay samples.
    let mut start_frame = 0;
    if slot.skip_samples > 0 {
        let skip = (slot.skip_samples).min(decoded as u64) as usize;
        slot.skip_samples -= skip as u64;
        start_frame = skip;
        if start_frame == decoded {
            // Nothing usable this round, but the stream advanced;
            // report progress so the caller loops again.
            return 1;
        }
    }

    // Tail trim: clamp to the effective end (encoder padding).
    let before = slot.position_samples;
    let mut usable = decoded - start_frame;
    let remaining = effective_end.saturating_sub(before + start_frame as u64);
    if (usable as u64) > remaining {
        usable = remaining as usize;
        slot.eos = true;
    }
    slot.position_samples = before + (start_frame + usable) as u64;
    if slot.position_samples >= effective_end {
        slot.eos = true;
    }
    shared
        .position_samples
        .store(slot.position_samples, Ordering::Release);

    if usable == 0 {
        return 1; // Progressed past trim only.
    }

    // Int32 -> Float32.
    let samples = usable * in_channels;
    let offset = start_frame * in_channels;
    for i in 0..samples {
        core.float_buf[i] = core.decode_buf[offset + i] as f32 * INT32_SCALE;
    }

    // Channel adaptation to the output layout.
    adapt_channels(
        &core.float_buf[..samples],
        in_channels,
        &mut core.chan_buf,
        out_channels,
        usable,
    );

    // Resample to the output rate.
    if core.resampling {
        let produced = core.converter.convert(
            &core.chan_buf[..usable * out_channels],
            &mut core.resampled,
        );
        core.pending
            .extend_from_slice(&core.resampled[..produced * out_channels]);
        produced.max(1)
    } else {
        core.pending
            .extend_from_slice(&core.chan_buf[..usable * out_channels]);
        usable
    }
}

/// Mixes `frames` frames from `in_channels` to `out_channels`.
///
/// Mono fans out, extra source channels fold into an average when the
/// output is mono, and other mismatches copy modulo the source layout.
fn adapt_channels(
    input: &[f32],
    in_channels: usize,
    output: &mut [f32],
    out_channels: usize,
    frames: usize,
) {
    if in_channels == out_channels {
        output[..frames * out_channels].copy_from_slice(input);
        return;
    }

    #[expect(clippy::cast_precision_loss)]
    let scale = 1.0 / in_channels as f32;
    for frame in 0..frames {
        if out_channels == 1 {
            let sum: f32 = input[frame * in_channels..(frame + 1) * in_channels]
                .iter()
                .sum();
            output[frame] = sum * scale;
        } else {
            for ch in 0..out_channels {
                output[frame * out_channels + ch] = input[frame * in_channels + ch % in_channels];
            }
        }
    }
}

/// Inline gapless handover, invoked from the callback at EOS.
fn transition_to_next(core: &mut EngineCore, shared: &EngineShared) {
    let Some(next) = core.next else {
        return;
    };

    shared.set_state(PlaybackState::Transitioning);

    let old_info = core.slots[core.current].info;
    let new_info = core.slots[next].info;

    // Park the retired stream; the control thread drops it later so the
    // callback never touches the filesystem.
    let old = core.slots[core.current].clear();
    if let Some(old) = old {
        core.graveyard.push(old);
    }

    core.current = next;
    core.next = None;
    let current = core.current;
    core.slots[current].active = true;

    let format_matches = old_info.sample_rate == new_info.sample_rate
        && old_info.channels == new_info.channels;
    if format_matches {
        debug!("gapless transition (sample-exact)");
    } else {
        debug!(
            "gapless transition with format change {} Hz/{}ch -> {} Hz/{}ch, crossfading {} ms",
            old_info.sample_rate,
            old_info.channels,
            new_info.sample_rate,
            new_info.channels,
            CROSSFADE_DURATION_MS
        );
        core.crossfade_total =
            (core.out_rate * CROSSFADE_DURATION_MS / 1000) as usize;
        core.crossfade_remaining = core.crossfade_total;
    }

    // Reconfigure the resampler for the new slot's rate. The shared
    // scratch buffers are already sized for any rate.
    core.resampling = new_info.sample_rate != core.out_rate;
    if core.resampling {
        if let Err(e) = core.converter.initialize(
            new_info.sample_rate,
            core.out_rate,
            core.out_channels as u32,
        ) {
            error!("resampler reconfiguration failed: {e}");
        }
    }

    shared
        .sample_rate
        .store(new_info.sample_rate, Ordering::Release);
    shared
        .duration_ms
        .store(new_info.duration_ms, Ordering::Release);
    shared
        .position_samples
        .store(core.slots[current].position_samples, Ordering::Release);

    shared.set_state(PlaybackState::Playing);
    shared.publish(Event::TrackChanged);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioStreamInfo;
    use crate::output::{AudioDeviceInfo, AudioCallback};

    /// Decoder producing a sine tone without touching the filesystem.
    struct SineDecoder {
        rate: u32,
        channels: u32,
        total_frames: u64,
        freq: f32,
    }

    impl Decoder for SineDecoder {
        fn name(&self) -> &'static str {
            "sine"
        }

        fn probe(&self, _header: &[u8]) -> u8 {
            100
        }

        fn extensions(&self) -> &'static [&'static str] {
            &["sine"]
        }

        fn open(&self, _path: &Path) -> Result<Box<dyn DecoderStream>> {
            Ok(Box::new(SineStream {
                rate: self.rate,
                channels: self.channels,
                total_frames: self.total_frames,
                freq: self.freq,
                position: 0,
            }))
        }
    }

    #[derive(Debug)]
    struct SineStream {
        rate: u32,
        channels: u32,
        total_frames: u64,
        freq: f32,
        position: u64,
    }

    impl DecoderStream for SineStream {
        fn stream_info(&self) -> AudioStreamInfo {
            AudioStreamInfo {
                sample_rate: self.rate,
                channels: self.channels,
                format: SampleFormat::Float32,
                total_samples: self.total_frames,
                duration_ms: AudioStreamInfo::derive_duration_ms(self.total_frames, self.rate),
                bitrate_kbps: 0,
            }
        }

        fn decode_block(&mut self, out: &mut [i32]) -> Result<usize> {
            let channels = self.channels as usize;
            let capacity = out.len() / channels;
            let remaining = (self.total_frames - self.position) as usize;
            let frames = capacity.min(remaining);

            for i in 0..frames {
                let t = (self.position + i as u64) as f32 / self.rate as f32;
                let value = (2.0 * std::f32::consts::PI * self.freq * t).sin() * 0.5;
                let sample = (value * 2_147_483_647.0) as i32;
                for ch in 0..channels {
                    out[i * channels + ch] = sample;
                }
            }
            self.position += frames as u64;
            Ok(frames)
        }

        fn seek(&mut self, position_ms: u64) -> Result<u64> {
            self.position =
                (position_ms * u64::from(self.rate) / 1000).min(self.total_frames);
            Ok(self.position * 1000 / u64::from(self.rate))
        }

        fn metadata(&mut self) -> Vec<(String, String)> {
            Vec::new()
        }
    }

    /// Output backend pulled by the test instead of a device thread.
    struct MockOutput {
        callback: Arc<Mutex<Option<AudioCallback>>>,
        rate: u32,
        channels: u32,
        open: bool,
        running: bool,
    }

    #[derive(Clone)]
    struct MockHandle {
        callback: Arc<Mutex<Option<AudioCallback>>>,
        channels: usize,
    }

    impl MockHandle {
        /// Pulls `frames` frames through the engine callback.
        fn pull(&self, frames: usize) -> Vec<f32> {
            let mut buffer = vec![0.0; frames * self.channels];
            if let Some(callback) = self.callback.lock().unwrap().as_mut() {
                callback(&mut buffer, frames);
            }
            buffer
        }
    }

    fn mock_output(rate: u32, channels: u32) -> (Box<MockOutput>, MockHandle) {
        let callback = Arc::new(Mutex::new(None));
        let output = Box::new(MockOutput {
            callback: Arc::clone(&callback),
            rate,
            channels,
            open: false,
            running: false,
        });
        let handle = MockHandle {
            callback,
            channels: channels as usize,
        };
        (output, handle)
    }

    impl AudioOutput for MockOutput {
        fn enumerate_devices(&self) -> Result<Vec<AudioDeviceInfo>> {
            Ok(vec![AudioDeviceInfo {
                id: "mock".to_string(),
                name: "mock".to_string(),
                max_channels: self.channels,
                default_sample_rate: self.rate,
                is_default: true,
            }])
        }

        fn open(&mut self, config: AudioOutputConfig) -> Result<NegotiatedFormat> {
            *self.callback.lock().unwrap() = Some(config.callback);
            self.open = true;
            Ok(NegotiatedFormat {
                sample_rate: self.rate,
                channels: self.channels,
                format: SampleFormat::Float32,
                buffer_frames: 1024,
            })
        }

        fn start(&mut self) -> Result<()> {
            if !self.open {
                return Err(Error::invalid_state("not open"));
            }
            self.running = true;
            Ok(())
        }

        fn stop(&mut self) -> Result<()> {
            self.running = false;
            Ok(())
        }

        fn close(&mut self) {
            self.running = false;
            self.open = false;
            *self.callback.lock().unwrap() = None;
        }

        fn latency_ms(&self) -> u32 {
            21
        }

        fn set_volume(&mut self, _volume: f32) -> Result<()> {
            Ok(())
        }

        fn get_volume(&self) -> f32 {
            1.0
        }
    }

    fn sine_decoder(rate: u32, seconds: f32) -> Arc<dyn Decoder> {
        Arc::new(SineDecoder {
            rate,
            channels: 2,
            total_frames: (rate as f32 * seconds) as u64,
            freq: 440.0,
        })
    }

    fn engine_with_output(rate: u32) -> (PlaybackEngine, MockHandle) {
        let engine = PlaybackEngine::new();
        let (output, handle) = mock_output(rate, 2);
        engine.initialize(output).unwrap();
        (engine, handle)
    }

    #[test]
    fn initialize_twice_is_rejected() {
        let (engine, _handle) = engine_with_output(48_000);
        let (other, _other_handle) = mock_output(48_000, 2);
        let err = engine.initialize(other).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::AlreadyInitialized);
    }

    #[test]
    fn play_without_track_is_invalid_state() {
        let (engine, _handle) = engine_with_output(48_000);
        let err = engine.play().unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::InvalidState);
        assert_eq!(engine.state(), PlaybackState::Stopped);
    }

    #[test]
    fn play_produces_the_tone() {
        let (engine, handle) = engine_with_output(48_000);
        engine
            .load_track(Path::new("tone.sine"), &sine_decoder(48_000, 2.0))
            .unwrap();
        engine.play().unwrap();
        assert_eq!(engine.state(), PlaybackState::Playing);

        let buffer = handle.pull(1024);
        let peak = buffer.iter().fold(0.0_f32, |a, &b| a.max(b.abs()));
        assert!(peak > 0.4 && peak <= 0.51, "peak {peak}");
    }

    #[test]
    fn stopped_state_produces_silence() {
        let (engine, handle) = engine_with_output(48_000);
        engine
            .load_track(Path::new("tone.sine"), &sine_decoder(48_000, 2.0))
            .unwrap();
        engine.play().unwrap();
        engine.pause().unwrap();

        let buffer = handle.pull(1024);
        assert!(buffer.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn stop_resets_position_and_pause_is_noop() {
        let (engine, handle) = engine_with_output(48_000);
        engine
            .load_track(Path::new("tone.sine"), &sine_decoder(48_000, 2.0))
            .unwrap();
        engine.play().unwrap();
        handle.pull(4096);
        assert!(engine.get_position() > 0);

        engine.stop().unwrap();
        assert_eq!(engine.state(), PlaybackState::Stopped);
        assert_eq!(engine.get_position(), 0);

        // Pause after stop is a successful no-op.
        engine.pause().unwrap();
        assert_eq!(engine.state(), PlaybackState::Stopped);
    }

    #[test]
    fn eos_without_next_degrades_to_stopped() {
        let (engine, handle) = engine_with_output(48_000);
        // 100 ms track.
        engine
            .load_track(Path::new("short.sine"), &sine_decoder(48_000, 0.1))
            .unwrap();
        engine.play().unwrap();

        // 4800 frames of content; drain past the end.
        for _ in 0..8 {
            handle.pull(1024);
        }
        assert_eq!(engine.state(), PlaybackState::Stopped);

        // Subsequent pulls emit silence.
        let buffer = handle.pull(1024);
        assert!(buffer.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn gapless_transition_fills_the_same_buffer() {
        let (engine, handle) = engine_with_output(48_000);
        engine
            .load_track(Path::new("a.sine"), &sine_decoder(48_000, 0.1))
            .unwrap();
        engine.play().unwrap();
        engine
            .prepare_next_track(Path::new("b.sine"), &sine_decoder(48_000, 0.5))
            .unwrap();

        // The seam lands mid-buffer; every buffer must stay non-silent.
        let mut transitioned = false;
        for _ in 0..10 {
            let buffer = handle.pull(1024);
            let peak = buffer.iter().fold(0.0_f32, |a, &b| a.max(b.abs()));
            assert!(peak > 0.1, "dropout at the seam, peak {peak}");
            if engine.get_duration() == 500 {
                transitioned = true;
                break;
            }
        }
        assert!(transitioned, "transition never happened");
        assert_eq!(engine.state(), PlaybackState::Playing);
    }

    #[test]
    fn resampling_slot_still_produces_audio() {
        let (engine, handle) = engine_with_output(48_000);
        engine
            .load_track(Path::new("cd.sine"), &sine_decoder(44_100, 1.0))
            .unwrap();
        engine.play().unwrap();

        let buffer = handle.pull(1024);
        let nonzero = buffer.iter().filter(|s| s.abs() > 0.01).count();
        assert!(nonzero > 1000, "only {nonzero} live samples");
    }

    #[test]
    fn seek_lands_at_or_after_target() {
        let (engine, handle) = engine_with_output(48_000);
        engine
            .load_track(Path::new("long.sine"), &sine_decoder(48_000, 60.0))
            .unwrap();
        engine.play().unwrap();
        handle.pull(1024);

        let actual = engine.seek(30_000).unwrap();
        assert!(actual >= 30_000 && actual <= 30_100);
        let position = engine.get_position();
        assert!(position >= 30_000 && position <= 30_100, "position {position}");

        // Idempotent: seeking again gives an equivalent result.
        let again = engine.seek(30_000).unwrap();
        assert_eq!(actual, again);
    }

    #[test]
    fn volume_is_applied_and_clamped() {
        let (engine, handle) = engine_with_output(48_000);
        engine
            .load_track(Path::new("tone.sine"), &sine_decoder(48_000, 2.0))
            .unwrap();
        engine.play().unwrap();

        engine.set_volume(2.0);
        assert_eq!(engine.volume(), 1.0);
        engine.set_volume(0.5);
        let buffer = handle.pull(1024);
        let peak = buffer.iter().fold(0.0_f32, |a, &b| a.max(b.abs()));
        assert!(peak < 0.3, "volume not applied, peak {peak}");
    }

    #[test]
    fn approaching_end_predicate() {
        let (engine, handle) = engine_with_output(48_000);
        engine
            .load_track(Path::new("short.sine"), &sine_decoder(48_000, 2.0))
            .unwrap();
        engine.play().unwrap();
        // 2 s track: under the 5 s threshold from the first sample.
        handle.pull(1024);
        assert!(engine.is_approaching_end());

        engine.stop().unwrap();
        engine
            .load_track(Path::new("long.sine"), &sine_decoder(48_000, 60.0))
            .unwrap();
        engine.play().unwrap();
        handle.pull(1024);
        assert!(!engine.is_approaching_end());
    }

    #[test]
    fn load_track_while_playing_is_rejected() {
        let (engine, _handle) = engine_with_output(48_000);
        engine
            .load_track(Path::new("tone.sine"), &sine_decoder(48_000, 2.0))
            .unwrap();
        engine.play().unwrap();

        let err = engine
            .load_track(Path::new("other.sine"), &sine_decoder(48_000, 2.0))
            .unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::InvalidState);
    }
}
