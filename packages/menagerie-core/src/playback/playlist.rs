//! Playlist playback: one animation at a time, looping, interruptible.
//!
//! A controller owns one universe's playlist walk. It schedules exactly
//! one session at a time; the session's completion hook decides what
//! happens next by consulting the SessionManager's derived state:
//! `Active` advances, `Interrupted` defers until resume, `Stopped`
//! terminates. Advancing wraps at the end of the list.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::directory::{AnimationProvider, PlaylistProvider};
use crate::error::{ServerError, ServerResult};
use crate::events::{EventEmitter, ServerEvent};
use crate::model::{Playlist, PlaylistStatus, UniverseId};
use crate::runtime::TaskSpawner;

use super::scheduler::CooperativeScheduler;
use super::session::{EndReason, Lifecycle};
use super::session_manager::{PlaylistState, SessionManager};

/// Drives one playlist on one universe.
pub struct PlaylistController {
    playlist: Playlist,
    universe: UniverseId,
    /// Index of the next animation to schedule (monotonic; wrapped
    /// modulo the list length at use).
    next_index: AtomicUsize,
    scheduler: Arc<CooperativeScheduler>,
    sessions: Arc<SessionManager>,
    animations: Arc<dyn AnimationProvider>,
    emitter: Arc<dyn EventEmitter>,
    spawner: Arc<dyn TaskSpawner>,
}

impl PlaylistController {
    pub fn new(
        playlist: Playlist,
        universe: UniverseId,
        scheduler: Arc<CooperativeScheduler>,
        sessions: Arc<SessionManager>,
        animations: Arc<dyn AnimationProvider>,
        emitter: Arc<dyn EventEmitter>,
        spawner: Arc<dyn TaskSpawner>,
    ) -> Arc<Self> {
        Arc::new(Self {
            playlist,
            universe,
            next_index: AtomicUsize::new(0),
            scheduler,
            sessions,
            animations,
            emitter,
            spawner,
        })
    }

    /// Starts the playlist. An empty playlist terminates immediately
    /// with no session and no registered state.
    pub async fn play(self: Arc<Self>) -> ServerResult<()> {
        if self.playlist.animation_ids.is_empty() {
            log::info!(
                "playlist '{}' is empty; nothing to play on universe {}",
                self.playlist.id,
                self.universe
            );
            self.emit_status(false, None);
            return Ok(());
        }

        self.sessions.start_playlist(self.universe, &self.playlist.id);
        self.advance().await
    }

    /// Schedules the next animation, skipping unplayable entries. One
    /// full cycle of failures stops the playlist rather than spinning.
    async fn advance(self: Arc<Self>) -> ServerResult<()> {
        let len = self.playlist.animation_ids.len();
        for _ in 0..len {
            let slot = self.next_index.fetch_add(1, Ordering::SeqCst) % len;
            let animation_id = &self.playlist.animation_ids[slot];

            let animation = match self.animations.animation(animation_id) {
                Ok(animation) => animation,
                Err(e) => {
                    log::warn!(
                        "playlist '{}': skipping animation '{}': {}",
                        self.playlist.id,
                        animation_id,
                        e
                    );
                    continue;
                }
            };

            let hook_controller = self.clone();
            let lifecycle = Lifecycle {
                on_end: Some(Box::new(move |reason| {
                    hook_controller.handle_session_end(reason);
                })),
                ..Default::default()
            };

            match self
                .scheduler
                .play_animation(self.universe, &animation, true, lifecycle)
                .await
            {
                Ok(_) => {
                    self.emit_status(true, Some(animation.id.clone()));
                    return Ok(());
                }
                Err(e) => {
                    log::warn!(
                        "playlist '{}': failed to schedule '{}': {}",
                        self.playlist.id,
                        animation_id,
                        e
                    );
                }
            }
        }

        log::error!(
            "playlist '{}' on universe {} has no playable animation; stopping",
            self.playlist.id,
            self.universe
        );
        self.sessions.stop_playlist(self.universe);
        self.emit_status(false, None);
        Err(ServerError::NotFound(format!(
            "no playable animation in playlist '{}'",
            self.playlist.id
        )))
    }

    /// Completion hook, invoked on the loop thread by the runner.
    fn handle_session_end(self: Arc<Self>, reason: EndReason) {
        if reason != EndReason::Completed {
            // Cancellations come from interrupts, stops, or
            // replacement; whoever caused them owns the follow-up.
            return;
        }
        match self.sessions.playlist_state(self.universe) {
            PlaylistState::Active => {
                let controller = self.clone();
                self.spawner.spawn(Box::pin(async move {
                    if let Err(e) = controller.advance().await {
                        log::error!("playlist advance failed: {}", e);
                    }
                }));
            }
            PlaylistState::Interrupted => {
                log::debug!(
                    "playlist '{}' interrupted; advance deferred until resume",
                    self.playlist.id
                );
            }
            PlaylistState::Stopped | PlaylistState::None => {}
        }
    }

    /// Resumes after an interrupt. Returns false when the universe was
    /// not interrupted.
    pub async fn resume(self: Arc<Self>) -> ServerResult<bool> {
        if !self.sessions.resume_playlist(self.universe) {
            return Ok(false);
        }
        self.advance().await?;
        Ok(true)
    }

    /// Stops the playlist and cancels the current session.
    pub fn stop(&self) {
        self.sessions.stop_playlist(self.universe);
        self.emit_status(false, None);
    }

    fn emit_status(&self, playing: bool, current_animation: Option<String>) {
        self.emitter.emit(ServerEvent::PlaylistStatus(PlaylistStatus {
            universe: self.universe,
            playlist: self.playlist.id.clone(),
            playing,
            current_animation,
        }));
    }
}

/// Per-universe registry of playlist controllers.
pub struct PlaylistRegistry {
    controllers: DashMap<UniverseId, Arc<PlaylistController>>,
    playlists: Arc<dyn PlaylistProvider>,
    animations: Arc<dyn AnimationProvider>,
    scheduler: Arc<CooperativeScheduler>,
    sessions: Arc<SessionManager>,
    emitter: Arc<dyn EventEmitter>,
    spawner: Arc<dyn TaskSpawner>,
}

impl PlaylistRegistry {
    pub fn new(
        playlists: Arc<dyn PlaylistProvider>,
        animations: Arc<dyn AnimationProvider>,
        scheduler: Arc<CooperativeScheduler>,
        sessions: Arc<SessionManager>,
        emitter: Arc<dyn EventEmitter>,
        spawner: Arc<dyn TaskSpawner>,
    ) -> Arc<Self> {
        Arc::new(Self {
            controllers: DashMap::new(),
            playlists,
            animations,
            scheduler,
            sessions,
            emitter,
            spawner,
        })
    }

    /// Starts a playlist on a universe, replacing any previous
    /// controller there.
    pub async fn start(&self, universe: UniverseId, playlist_id: &str) -> ServerResult<()> {
        let playlist = self.playlists.playlist(playlist_id)?;
        let controller = PlaylistController::new(
            playlist,
            universe,
            self.scheduler.clone(),
            self.sessions.clone(),
            self.animations.clone(),
            self.emitter.clone(),
            self.spawner.clone(),
        );
        self.controllers.insert(universe, controller.clone());
        controller.play().await
    }

    /// Resumes an interrupted playlist. False when there is nothing to
    /// resume.
    pub async fn resume(&self, universe: UniverseId) -> ServerResult<bool> {
        let controller = match self.controllers.get(&universe) {
            Some(entry) => entry.value().clone(),
            None => return Ok(false),
        };
        controller.resume().await
    }

    /// Stops the playlist on a universe, if one is registered.
    pub fn stop(&self, universe: UniverseId) {
        if let Some(entry) = self.controllers.get(&universe) {
            entry.value().stop();
        } else {
            // No controller (e.g. after restart mid-playlist state);
            // still mark the universe stopped.
            self.sessions.stop_playlist(universe);
        }
    }
}
