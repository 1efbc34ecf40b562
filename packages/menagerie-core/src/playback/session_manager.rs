//! Session registry and the playlist interrupt/resume state machine.
//!
//! One mutex guards the whole universe map. Every public operation
//! acquires it, does O(1) work, and releases it before any scheduling
//! happens; cancellation of a displaced session occurs synchronously
//! under the lock, which is what guarantees no tick ever sees two
//! active sessions on one universe.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::model::{PlaylistId, UniverseId};

use super::session::PlaybackSession;

/// Derived playlist state for a universe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaylistState {
    /// No playlist has ever touched this universe.
    None,
    /// Playlist running normally.
    Active,
    /// Playlist preempted by an interrupt; may be resumed.
    Interrupted,
    /// Playlist explicitly stopped.
    Stopped,
}

#[derive(Default)]
struct UniverseState {
    current_session: Option<Arc<PlaybackSession>>,
    is_playlist: bool,
    is_interrupted: bool,
    should_resume_playlist: bool,
    is_stopped: bool,
    playlist_id: Option<PlaylistId>,
}

/// Central registry of active playback, one slot per universe.
#[derive(Default)]
pub struct SessionManager {
    universes: Mutex<HashMap<UniverseId, UniverseState>>,
}

impl SessionManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers a new session on a universe, cancelling any session
    /// already there.
    ///
    /// Playlist bookkeeping is preserved: a one-shot animation playing
    /// inside a playlist does not demote the playlist, so `is_playlist`
    /// only ever flips to true here.
    pub fn register_session(
        &self,
        universe: UniverseId,
        session: Arc<PlaybackSession>,
        is_playlist: bool,
    ) {
        let mut universes = self.universes.lock();
        let state = universes.entry(universe).or_default();

        if let Some(existing) = state.current_session.take() {
            if !existing.is_cancelled() {
                log::debug!(
                    "cancelling existing session '{}' on universe {} for new session",
                    existing.animation_id,
                    universe
                );
                existing.cancel();
            }
        }

        state.current_session = Some(session);
        if is_playlist {
            state.is_playlist = true;
        }
        log::debug!(
            "registered session on universe {} (playlist: {})",
            universe,
            state.is_playlist
        );
    }

    /// Cancels current playback ahead of an interrupt and marks the
    /// playlist bookkeeping. Returns true when a playlist was playing
    /// and is now flagged as interrupted.
    ///
    /// The interrupt session itself is scheduled by the caller outside
    /// this lock and then handed to [`Self::register_session`] with
    /// `is_playlist = false`.
    pub fn begin_interrupt(&self, universe: UniverseId, should_resume: bool) -> bool {
        let mut universes = self.universes.lock();
        let Some(state) = universes.get_mut(&universe) else {
            return false;
        };

        if let Some(session) = &state.current_session {
            log::info!(
                "interrupting playback of '{}' on universe {}",
                session.animation_id,
                universe
            );
            session.cancel();
        }

        if state.is_playlist && state.current_session.is_some() {
            state.is_interrupted = true;
            state.should_resume_playlist = should_resume;
            log::info!(
                "marked playlist on universe {} as interrupted (resume: {})",
                universe,
                should_resume
            );
            return true;
        }
        false
    }

    /// Clears the interrupted flags so playlist advancement can run
    /// again. Returns true iff the universe was actually interrupted.
    pub fn resume_playlist(&self, universe: UniverseId) -> bool {
        let mut universes = self.universes.lock();
        let Some(state) = universes.get_mut(&universe) else {
            return false;
        };
        if !state.is_interrupted {
            log::debug!("no interrupted playlist to resume on universe {}", universe);
            return false;
        }
        log::info!("resuming playlist on universe {}", universe);
        state.is_interrupted = false;
        state.should_resume_playlist = false;
        true
    }

    /// Stops the playlist on a universe and cancels whatever is
    /// playing.
    pub fn stop_playlist(&self, universe: UniverseId) {
        let mut universes = self.universes.lock();
        if let Some(state) = universes.get_mut(&universe) {
            if state.is_playlist {
                log::info!("stopping playlist on universe {}", universe);
                state.is_stopped = true;
                state.is_interrupted = false;
                state.should_resume_playlist = false;
                if let Some(session) = &state.current_session {
                    session.cancel();
                }
            }
        }
    }

    /// Initializes fresh playlist state for a universe. The first
    /// animation's session arrives later via [`Self::register_session`].
    pub fn start_playlist(&self, universe: UniverseId, playlist_id: &str) {
        let mut universes = self.universes.lock();
        log::info!(
            "starting playlist '{}' on universe {}",
            playlist_id,
            universe
        );
        // Replace wholesale; stale interrupt/stop flags must not leak
        // into the new playlist.
        let previous = universes.insert(
            universe,
            UniverseState {
                current_session: None,
                is_playlist: true,
                is_interrupted: false,
                should_resume_playlist: false,
                is_stopped: false,
                playlist_id: Some(playlist_id.to_string()),
            },
        );
        if let Some(previous) = previous {
            if let Some(session) = previous.current_session {
                session.cancel();
            }
        }
    }

    /// Cancels and forgets everything about a universe.
    pub fn cancel_universe(&self, universe: UniverseId) {
        let mut universes = self.universes.lock();
        if let Some(state) = universes.remove(&universe) {
            log::info!("cancelling all playback on universe {}", universe);
            if let Some(session) = state.current_session {
                session.cancel();
            }
        }
    }

    /// Drops the session pointer once its runner delivered the terminal
    /// lifecycle, preserving playlist bookkeeping.
    pub fn clear_current_session(&self, universe: UniverseId) {
        let mut universes = self.universes.lock();
        if let Some(state) = universes.get_mut(&universe) {
            state.current_session = None;
        }
    }

    /// Like [`Self::clear_current_session`], but only when the slot
    /// still holds the given session. A runner whose session was
    /// already displaced by a newer registration must not null out the
    /// replacement.
    pub fn clear_session_if_current(&self, universe: UniverseId, session: &Arc<PlaybackSession>) {
        let mut universes = self.universes.lock();
        if let Some(state) = universes.get_mut(&universe) {
            let is_current = state
                .current_session
                .as_ref()
                .map(|current| Arc::ptr_eq(current, session))
                .unwrap_or(false);
            if is_current {
                state.current_session = None;
            }
        }
    }

    /// Current session on a universe, if any.
    pub fn current_session(&self, universe: UniverseId) -> Option<Arc<PlaybackSession>> {
        self.universes
            .lock()
            .get(&universe)
            .and_then(|s| s.current_session.clone())
    }

    /// True when a non-cancelled session is registered on the universe.
    pub fn is_playing(&self, universe: UniverseId) -> bool {
        self.universes
            .lock()
            .get(&universe)
            .and_then(|s| s.current_session.as_ref())
            .map(|session| !session.is_cancelled())
            .unwrap_or(false)
    }

    pub fn has_interrupted_playlist(&self, universe: UniverseId) -> bool {
        self.universes
            .lock()
            .get(&universe)
            .map(|s| s.is_interrupted)
            .unwrap_or(false)
    }

    /// Whether the interrupted playlist asked to resume automatically.
    pub fn should_resume_playlist(&self, universe: UniverseId) -> bool {
        self.universes
            .lock()
            .get(&universe)
            .map(|s| s.should_resume_playlist)
            .unwrap_or(false)
    }

    pub fn playlist_id(&self, universe: UniverseId) -> Option<PlaylistId> {
        self.universes
            .lock()
            .get(&universe)
            .and_then(|s| s.playlist_id.clone())
    }

    /// Derived playlist state for a universe.
    pub fn playlist_state(&self, universe: UniverseId) -> PlaylistState {
        let universes = self.universes.lock();
        let Some(state) = universes.get(&universe) else {
            return PlaylistState::None;
        };
        if !state.is_playlist {
            return PlaylistState::None;
        }
        if state.is_stopped {
            return PlaylistState::Stopped;
        }
        if state.is_interrupted {
            return PlaylistState::Interrupted;
        }
        PlaylistState::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dmx::WriteLayer;
    use crate::playback::session::Lifecycle;

    fn session(universe: UniverseId) -> Arc<PlaybackSession> {
        PlaybackSession::new(
            "anim".into(),
            "Test".into(),
            universe,
            0,
            10,
            WriteLayer::Animation,
            Vec::new(),
            None,
            Lifecycle::default(),
        )
    }

    #[test]
    fn register_cancels_existing_session() {
        let manager = SessionManager::new();
        let first = session(1);
        let second = session(1);

        manager.register_session(1, first.clone(), false);
        manager.register_session(1, second.clone(), false);

        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
        assert!(Arc::ptr_eq(&manager.current_session(1).unwrap(), &second));
    }

    #[test]
    fn never_two_active_sessions_on_one_universe() {
        let manager = SessionManager::new();
        let sessions: Vec<_> = (0..5).map(|_| session(1)).collect();
        for s in &sessions {
            manager.register_session(1, s.clone(), false);
        }
        let active = sessions.iter().filter(|s| !s.is_cancelled()).count();
        assert_eq!(active, 1);
    }

    #[test]
    fn one_shot_inside_playlist_preserves_playlist_flag() {
        let manager = SessionManager::new();
        manager.start_playlist(3, "p1");
        manager.register_session(3, session(3), true);
        assert_eq!(manager.playlist_state(3), PlaylistState::Active);

        // A non-playlist registration must not demote the playlist.
        manager.register_session(3, session(3), false);
        assert_eq!(manager.playlist_state(3), PlaylistState::Active);
        assert_eq!(manager.playlist_id(3), Some("p1".to_string()));
    }

    #[test]
    fn interrupt_marks_playlist_and_cancels() {
        let manager = SessionManager::new();
        manager.start_playlist(3, "p1");
        let playing = session(3);
        manager.register_session(3, playing.clone(), true);

        let interrupted = manager.begin_interrupt(3, true);
        assert!(interrupted);
        assert!(playing.is_cancelled());
        assert_eq!(manager.playlist_state(3), PlaylistState::Interrupted);
        assert!(manager.should_resume_playlist(3));
    }

    #[test]
    fn interrupt_of_one_shot_does_not_mark_playlist() {
        let manager = SessionManager::new();
        let playing = session(5);
        manager.register_session(5, playing.clone(), false);

        let interrupted = manager.begin_interrupt(5, true);
        assert!(!interrupted);
        assert!(playing.is_cancelled());
        assert_eq!(manager.playlist_state(5), PlaylistState::None);
    }

    #[test]
    fn interrupt_session_registration_keeps_interrupted_state() {
        let manager = SessionManager::new();
        manager.start_playlist(3, "p1");
        manager.register_session(3, session(3), true);
        manager.begin_interrupt(3, true);

        // The interrupt session registers as non-playlist.
        manager.register_session(3, session(3), false);
        assert_eq!(manager.playlist_state(3), PlaylistState::Interrupted);
    }

    #[test]
    fn resume_clears_interrupt_and_reports() {
        let manager = SessionManager::new();
        manager.start_playlist(3, "p1");
        manager.register_session(3, session(3), true);
        manager.begin_interrupt(3, true);

        assert!(manager.resume_playlist(3));
        assert_eq!(manager.playlist_state(3), PlaylistState::Active);
        assert!(!manager.should_resume_playlist(3));

        // Second resume is a no-op.
        assert!(!manager.resume_playlist(3));
    }

    #[test]
    fn resume_without_interrupt_returns_false() {
        let manager = SessionManager::new();
        manager.start_playlist(3, "p1");
        assert!(!manager.resume_playlist(3));
        assert!(!manager.resume_playlist(99));
    }

    #[test]
    fn stop_playlist_cancels_and_sticks() {
        let manager = SessionManager::new();
        manager.start_playlist(3, "p1");
        let playing = session(3);
        manager.register_session(3, playing.clone(), true);

        manager.stop_playlist(3);
        assert!(playing.is_cancelled());
        assert_eq!(manager.playlist_state(3), PlaylistState::Stopped);
        assert!(!manager.has_interrupted_playlist(3));
    }

    #[test]
    fn start_playlist_resets_stale_flags() {
        let manager = SessionManager::new();
        manager.start_playlist(3, "p1");
        manager.register_session(3, session(3), true);
        manager.stop_playlist(3);

        manager.start_playlist(3, "p2");
        assert_eq!(manager.playlist_state(3), PlaylistState::Active);
        assert_eq!(manager.playlist_id(3), Some("p2".to_string()));
        assert!(manager.current_session(3).is_none());
    }

    #[test]
    fn cancel_universe_removes_all_state() {
        let manager = SessionManager::new();
        let playing = session(4);
        manager.register_session(4, playing.clone(), false);

        manager.cancel_universe(4);
        assert!(playing.is_cancelled());
        assert_eq!(manager.playlist_state(4), PlaylistState::None);
        assert!(manager.current_session(4).is_none());
    }

    #[test]
    fn clear_current_session_preserves_playlist_state() {
        let manager = SessionManager::new();
        manager.start_playlist(3, "p1");
        manager.register_session(3, session(3), true);

        manager.clear_current_session(3);
        assert!(manager.current_session(3).is_none());
        assert_eq!(manager.playlist_state(3), PlaylistState::Active);
        assert_eq!(manager.playlist_id(3), Some("p1".to_string()));
    }

    #[test]
    fn clear_if_current_ignores_displaced_sessions() {
        let manager = SessionManager::new();
        let old = session(2);
        let new = session(2);
        manager.register_session(2, old.clone(), false);
        manager.register_session(2, new.clone(), false);

        // The displaced session's runner finishes late; the fresh
        // session must survive.
        manager.clear_session_if_current(2, &old);
        assert!(Arc::ptr_eq(&manager.current_session(2).unwrap(), &new));

        manager.clear_session_if_current(2, &new);
        assert!(manager.current_session(2).is_none());
    }

    #[test]
    fn is_playing_reflects_cancellation() {
        let manager = SessionManager::new();
        assert!(!manager.is_playing(1));

        let playing = session(1);
        manager.register_session(1, playing.clone(), false);
        assert!(manager.is_playing(1));

        playing.cancel();
        assert!(!manager.is_playing(1));
    }

    #[test]
    fn non_playlist_universe_reports_none() {
        let manager = SessionManager::new();
        manager.register_session(8, session(8), false);
        assert_eq!(manager.playlist_state(8), PlaylistState::None);
    }
}
