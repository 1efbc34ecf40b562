//! The cooperative animation scheduler.
//!
//! Turns an [`Animation`] into a [`PlaybackSession`] and puts the first
//! runner event on the loop. Validation and creature resolution happen
//! up front so a malformed animation is rejected before anything is
//! registered; audio pre-decode runs on a blocking worker so the loop
//! thread never waits on the encoder or the disk.

use std::sync::Arc;

use crate::audio::AudioCache;
use crate::directory::CreatureDirectory;
use crate::dmx::WriteLayer;
use crate::error::{ServerError, ServerResult};
use crate::eventloop::{Event, EventLoopHandle};
use crate::events::{EventEmitter, ServerEvent, StatusLight};
use crate::model::{Animation, FrameNum, UniverseId};
use crate::protocol_constants::OPUS_FRAME_SAMPLES;

use super::session::{
    AudioRoute, Lifecycle, PlaybackSession, ResolvedTrack, SessionAudio,
};
use super::session_manager::SessionManager;

/// Schedules animations for cooperative frame-by-frame playback.
pub struct CooperativeScheduler {
    handle: EventLoopHandle,
    sessions: Arc<SessionManager>,
    directory: Arc<dyn CreatureDirectory>,
    /// Absent when audio is disabled by configuration.
    audio_cache: Option<Arc<AudioCache>>,
    emitter: Arc<dyn EventEmitter>,
    /// Frames added to the default start frame for client clock skew.
    animation_delay_frames: u64,
}

impl CooperativeScheduler {
    pub fn new(
        handle: EventLoopHandle,
        sessions: Arc<SessionManager>,
        directory: Arc<dyn CreatureDirectory>,
        audio_cache: Option<Arc<AudioCache>>,
        emitter: Arc<dyn EventEmitter>,
        animation_delay_frames: u64,
    ) -> Arc<Self> {
        Arc::new(Self {
            handle,
            sessions,
            directory,
            audio_cache,
            emitter,
            animation_delay_frames,
        })
    }

    /// Default start frame for a newly requested playback: the next
    /// tick plus the configured skew allowance.
    pub fn default_start_frame(&self) -> FrameNum {
        self.handle.next_frame() + self.animation_delay_frames
    }

    /// Plays an animation on a universe, replacing whatever is there.
    ///
    /// `is_playlist_member` keeps the universe's playlist bookkeeping
    /// intact when a playlist controller is the caller.
    pub async fn play_animation(
        &self,
        universe: UniverseId,
        animation: &Animation,
        is_playlist_member: bool,
        lifecycle: Lifecycle,
    ) -> ServerResult<Arc<PlaybackSession>> {
        let session = self
            .schedule_animation(
                self.default_start_frame(),
                animation,
                universe,
                WriteLayer::Animation,
                lifecycle,
            )
            .await?;
        self.sessions
            .register_session(universe, session.clone(), is_playlist_member);
        Ok(session)
    }

    /// Preempts the universe with a one-shot interrupt animation.
    ///
    /// The current session is cancelled synchronously; if it belonged
    /// to a playlist, the playlist is flagged interrupted with the
    /// given resume intent. The interrupt registers as a non-playlist
    /// session so the bookkeeping survives it.
    pub async fn interrupt(
        &self,
        universe: UniverseId,
        animation: &Animation,
        should_resume: bool,
    ) -> ServerResult<Arc<PlaybackSession>> {
        self.sessions.begin_interrupt(universe, should_resume);

        let session = self
            .schedule_animation(
                self.handle.next_frame(),
                animation,
                universe,
                WriteLayer::Interrupt,
                Lifecycle::default(),
            )
            .await?;
        self.sessions
            .register_session(universe, session.clone(), false);
        log::info!(
            "interrupt '{}' scheduled on universe {}",
            animation.metadata.title,
            universe
        );
        Ok(session)
    }

    /// Builds a session for the animation and schedules its first
    /// runner event at `start_frame`.
    pub async fn schedule_animation(
        &self,
        start_frame: FrameNum,
        animation: &Animation,
        universe: UniverseId,
        layer: WriteLayer,
        lifecycle: Lifecycle,
    ) -> ServerResult<Arc<PlaybackSession>> {
        animation.validate()?;

        let tick_ms = self.handle.clock().period().as_millis() as u32;
        if animation.metadata.milliseconds_per_frame != tick_ms {
            return Err(ServerError::InvalidData(format!(
                "animation '{}' is {} ms/frame; this server ticks at {} ms",
                animation.id, animation.metadata.milliseconds_per_frame, tick_ms
            )));
        }

        let (tracks, routes) = self.resolve_tracks(animation)?;
        let audio = self.load_audio(animation, routes, start_frame).await?;

        let session = PlaybackSession::new(
            animation.id.clone(),
            animation.metadata.title.clone(),
            universe,
            start_frame,
            animation.metadata.number_of_frames as u64,
            layer,
            tracks,
            audio,
            self.with_status_light(lifecycle),
        );

        self.handle.schedule(
            Event::PlaybackRunner {
                session: session.clone(),
                next_frame: start_frame,
            },
            start_frame,
        );

        log::info!(
            "scheduled '{}' on universe {}: frames {}..{} ({})",
            animation.metadata.title,
            universe,
            start_frame,
            session.end_frame(),
            if session.audio.is_some() {
                "with audio"
            } else {
                "silent"
            }
        );
        Ok(session)
    }

    /// Resolves every track's creature into concrete DMX addressing and
    /// collects the audio stem routes.
    fn resolve_tracks(
        &self,
        animation: &Animation,
    ) -> ServerResult<(Vec<ResolvedTrack>, Vec<AudioRoute>)> {
        let mut tracks = Vec::with_capacity(animation.tracks.len());
        let mut routes = Vec::new();

        for track in &animation.tracks {
            let creature = self.directory.creature(&track.creature_id)?;
            let offset = creature.channel_offset;
            let widest = track.frames.iter().map(Vec::len).max().unwrap_or(0);
            if offset == 0 || offset as usize + widest > crate::protocol_constants::DMX_PROPERTY_COUNT
            {
                return Err(ServerError::InvalidData(format!(
                    "creature '{}' at offset {} with {}-byte frames does not fit a universe",
                    creature.id, offset, widest
                )));
            }

            if let Some(dest) = creature.audio_endpoint {
                if (1..crate::protocol_constants::RTP_CHANNEL_COUNT).contains(&creature.audio_channel)
                {
                    routes.push(AudioRoute {
                        channel: creature.audio_channel,
                        dest,
                    });
                } else {
                    log::warn!(
                        "creature '{}' has audio endpoint but invalid channel {}; skipping route",
                        creature.id,
                        creature.audio_channel
                    );
                }
            }

            tracks.push(ResolvedTrack {
                creature_id: track.creature_id.clone(),
                channel_offset: offset,
                frames: track.frames.clone(),
            });
        }
        Ok((tracks, routes))
    }

    /// Loads (or encodes) the animation's audio on a blocking worker.
    /// Returns `None` when the animation is silent or audio is
    /// disabled.
    async fn load_audio(
        &self,
        animation: &Animation,
        routes: Vec<AudioRoute>,
        start_frame: FrameNum,
    ) -> ServerResult<Option<SessionAudio>> {
        let Some(cache) = &self.audio_cache else {
            return Ok(None);
        };
        let Some(sound_file) = animation.metadata.sound_file.clone() else {
            return Ok(None);
        };
        if sound_file.is_empty() {
            return Ok(None);
        }

        let cache = cache.clone();
        let multitrack = animation.metadata.multitrack_audio;
        let buffer = tokio::task::spawn_blocking(move || cache.load_or_encode(&sound_file, multitrack))
            .await
            .map_err(ServerError::internal)??;

        if (buffer.frames_per_channel as u64) < animation.metadata.number_of_frames as u64 {
            log::warn!(
                "animation '{}': audio is {} frames, animation is {}; tail will be silent",
                animation.id,
                buffer.frames_per_channel,
                animation.metadata.number_of_frames
            );
        }

        Ok(Some(SessionAudio {
            buffer,
            routes,
            rtp_base: (start_frame as u32).wrapping_mul(OPUS_FRAME_SAMPLES as u32),
        }))
    }

    /// Wraps a lifecycle so the animation status light tracks playback.
    fn with_status_light(&self, mut lifecycle: Lifecycle) -> Lifecycle {
        let start_emitter = self.emitter.clone();
        let mut user_on_start = lifecycle.on_start.take();
        lifecycle.on_start = Some(Box::new(move |frame| {
            start_emitter.emit(ServerEvent::StatusLight {
                light: StatusLight::Animation,
                on: true,
            });
            if let Some(hook) = user_on_start.as_mut() {
                hook(frame);
            }
        }));

        let end_emitter = self.emitter.clone();
        let user_on_end = lifecycle.on_end.take();
        lifecycle.on_end = Some(Box::new(move |reason| {
            end_emitter.emit(ServerEvent::StatusLight {
                light: StatusLight::Animation,
                on: false,
            });
            if let Some(hook) = user_on_end {
                hook(reason);
            }
        }));

        lifecycle
    }
}
