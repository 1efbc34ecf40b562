//! Playback sessions: one in-flight playback of an animation.
//!
//! A session is an immutable descriptor (what to play, where, when)
//! plus a single atomic cancel flag and a small record of lifecycle
//! callbacks. The SessionManager holds one handle for cancellation;
//! the runner event holds another to drive playback. Cancellation is
//! cooperative and monotonic: once set, the flag never clears, and the
//! runner observes it within one tick.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::audio::EncodedAudio;
use crate::dmx::WriteLayer;
use crate::model::{AnimationId, CreatureId, FrameNum, UniverseId};

/// Why a session ended. Reported exactly once through `on_end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    Completed,
    Cancelled,
    Error,
}

/// Optional hooks called by the runner as playback progresses.
///
/// `on_start` fires before the first frame, `on_frame` after each
/// frame's DMX writes, `on_end` exactly once with the final reason.
#[derive(Default)]
pub struct Lifecycle {
    pub on_start: Option<Box<dyn FnMut(FrameNum) + Send>>,
    pub on_frame: Option<Box<dyn FnMut(FrameNum) + Send>>,
    pub on_end: Option<Box<dyn FnOnce(EndReason) + Send>>,
}

/// One creature's motion data with its DMX addressing already resolved.
pub struct ResolvedTrack {
    pub creature_id: CreatureId,
    pub channel_offset: u16,
    pub frames: Vec<Vec<u8>>,
}

/// Where one audio stem channel is delivered.
#[derive(Debug, Clone, Copy)]
pub struct AudioRoute {
    /// Stem channel (1..=16).
    pub channel: u8,
    pub dest: SocketAddr,
}

/// Pre-encoded audio attached to a session.
pub struct SessionAudio {
    pub buffer: Arc<EncodedAudio>,
    /// Stem routes for the creatures in this animation that have
    /// speakers. Channel 0 always goes to the multicast group.
    pub routes: Vec<AudioRoute>,
    /// RTP timestamp of frame index 0; subsequent frames add 960 each.
    pub rtp_base: u32,
}

/// One in-flight playback of an animation on a universe.
pub struct PlaybackSession {
    pub animation_id: AnimationId,
    pub title: String,
    pub universe: UniverseId,
    pub start_frame: FrameNum,
    pub length_frames: u64,
    /// Which DMX layer this session writes through. Interrupt sessions
    /// outrank live streams; ordinary playback sits below them.
    pub layer: WriteLayer,
    pub(crate) tracks: Vec<ResolvedTrack>,
    pub(crate) audio: Option<SessionAudio>,
    cancelled: AtomicBool,
    ended: AtomicBool,
    audio_fault_logged: AtomicBool,
    lifecycle: Mutex<Lifecycle>,
}

impl PlaybackSession {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        animation_id: AnimationId,
        title: String,
        universe: UniverseId,
        start_frame: FrameNum,
        length_frames: u64,
        layer: WriteLayer,
        tracks: Vec<ResolvedTrack>,
        audio: Option<SessionAudio>,
        lifecycle: Lifecycle,
    ) -> Arc<Self> {
        Arc::new(Self {
            animation_id,
            title,
            universe,
            start_frame,
            length_frames,
            layer,
            tracks,
            audio,
            cancelled: AtomicBool::new(false),
            ended: AtomicBool::new(false),
            audio_fault_logged: AtomicBool::new(false),
            lifecycle: Mutex::new(lifecycle),
        })
    }

    /// Requests cancellation. Monotonic; the runner stops within one
    /// tick of this returning.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// First frame after the session's playback window.
    pub fn end_frame(&self) -> FrameNum {
        self.start_frame + self.length_frames
    }

    /// Fires `on_start`.
    pub(crate) fn notify_start(&self, frame: FrameNum) {
        if let Some(hook) = self.lifecycle.lock().on_start.as_mut() {
            hook(frame);
        }
    }

    /// Fires `on_frame`.
    pub(crate) fn notify_frame(&self, frame: FrameNum) {
        if let Some(hook) = self.lifecycle.lock().on_frame.as_mut() {
            hook(frame);
        }
    }

    /// Ends the session, firing `on_end` exactly once no matter how
    /// many callers race here.
    pub(crate) fn finish(&self, reason: EndReason) {
        if self.ended.swap(true, Ordering::AcqRel) {
            return;
        }
        let hook = self.lifecycle.lock().on_end.take();
        if let Some(hook) = hook {
            hook(reason);
        }
    }

    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::Acquire)
    }

    /// Returns true the first time an audio fault is recorded, so the
    /// runner logs one line per session rather than one per tick.
    pub(crate) fn note_audio_fault(&self) -> bool {
        !self.audio_fault_logged.swap(true, Ordering::AcqRel)
    }
}
