//! Cooperative playback: sessions, the per-tick runner, the session
//! registry, and playlist control.

pub mod playlist;
pub(crate) mod runner;
pub mod scheduler;
pub mod session;
pub mod session_manager;

pub use playlist::{PlaylistController, PlaylistRegistry};
pub use scheduler::CooperativeScheduler;
pub use session::{AudioRoute, EndReason, Lifecycle, PlaybackSession, ResolvedTrack, SessionAudio};
pub use session_manager::{PlaylistState, SessionManager};
