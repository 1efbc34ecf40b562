//! Menagerie Core - real-time playback for animatronic creature fleets.
//!
//! This crate is the control plane for a herd of animatronic creatures:
//! servo positions go out as E1.31 (sACN) DMX packets, voices go out as
//! Opus-over-RTP, and everything is phase-locked to one 20 ms tick
//! clock. It is designed to be embedded by a headless server binary;
//! the HTTP/WebSocket API, document store, and hardware drivers are
//! external collaborators reached through trait seams.
//!
//! # Architecture
//!
//! - [`eventloop`]: the tick-driven scheduler every other component
//!   hangs off of
//! - [`playback`]: cooperative sessions, the per-tick runner, the
//!   session registry, playlist control
//! - [`dmx`]: universe state, merge rules, E1.31 packet emission
//! - [`audio`]: WAV-to-Opus pre-encoding, the on-disk cache, RTP
//!   emission
//! - [`ingress`]: live stream fragments from operator consoles
//! - [`directory`]: lookup seams for creatures, animations, playlists
//! - [`events`]: outbound domain events for API-layer clients
//! - [`core`]: explicit context wiring, no globals
//! - [`error`]: centralized error types
//!
//! # Abstraction Traits
//!
//! The crate defines several traits to decouple the playback core from
//! its collaborators:
//!
//! - [`CreatureDirectory`](directory::CreatureDirectory),
//!   [`AnimationProvider`](directory::AnimationProvider),
//!   [`PlaylistProvider`](directory::PlaylistProvider): the document
//!   store
//! - [`EventEmitter`](events::EventEmitter): outbound event transport
//! - [`TaskSpawner`](runtime::TaskSpawner): background task spawning
//! - [`DatagramSink`](dmx::DatagramSink): UDP emission

#![warn(clippy::all)]

pub mod audio;
pub mod clock;
pub mod core;
pub mod directory;
pub mod dmx;
pub mod error;
pub mod eventloop;
pub mod events;
pub mod ingress;
pub mod model;
pub mod playback;
pub mod protocol_constants;
pub mod runtime;
pub mod state;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used types at the crate root
pub use clock::FrameClock;
pub use self::core::{bootstrap, bootstrap_with_sinks, Core, CoreServices, Seams};
pub use directory::{AnimationProvider, CreatureDirectory, PlaylistProvider, StaticDirectory};
pub use error::{ServerError, ServerResult};
pub use eventloop::{DmxEvent, Event, EventLoop, EventLoopHandle};
pub use events::{BroadcastEmitter, CacheKind, EventEmitter, NoopEmitter, ServerEvent, StatusLight};
pub use model::{
    Animation, AnimationId, AnimationMetadata, Creature, CreatureId, FrameNum, Playlist,
    PlaylistId, PlaylistStatus, StreamFrame, Track, UniverseId,
};
pub use playback::{
    CooperativeScheduler, EndReason, Lifecycle, PlaybackSession, PlaylistRegistry, PlaylistState,
    SessionManager,
};
pub use runtime::{TaskSpawner, TokioSpawner};
pub use state::{AudioConfig, AudioMode, Config, SchedulerConfig};
