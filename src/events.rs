//! Events emitted during playback.
//!
//! This module defines the events the playback engine publishes on the
//! event bus. These events can be used to:
//! * Monitor playback state changes
//! * React to track changes and seeks
//! * Drive UI or scripting hooks
//!
//! # Example
//!
//! ```rust
//! use crescendo::events::Event;
//!
//! fn handle_event(event: Event) {
//!     match event {
//!         Event::Play => println!("Playback started"),
//!         Event::TrackChanged => println!("New track playing"),
//!         // ... handle other events ...
//!         _ => {}
//!     }
//! }
//! ```

/// Events that can be emitted by the playback engine.
///
/// These events represent significant state changes in playback.
/// Delivery order is FIFO per publisher; see the event bus.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Event {
    /// A track was loaded into a decoder slot.
    TrackLoaded,

    /// Playback has started.
    ///
    /// Emitted when a track begins playing, either from a paused
    /// state or when starting a new track.
    Play,

    /// Playback has paused.
    ///
    /// Emitted when playback is suspended but can be resumed
    /// from the current position.
    Pause,

    /// Playback has stopped.
    ///
    /// Emitted on an explicit stop and when the final track runs out
    /// with no prepared successor.
    Stopped,

    /// Current track has changed.
    ///
    /// Emitted when a gapless transition switches decoder slots, whether
    /// sample-exact or crossfaded.
    TrackChanged,

    /// A seek completed on the current track.
    Seeked,
}
