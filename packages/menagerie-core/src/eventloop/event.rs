//! The event sum type dispatched by the loop.
//!
//! One homogeneous enum instead of a class hierarchy: the queue stays a
//! plain container and dispatch is a match, not a vtable.

use std::sync::Arc;

use crate::core::Core;
use crate::error::ServerResult;
use crate::events::{CacheKind, ServerEvent, StatusLight};
use crate::model::{FrameNum, UniverseId};
use crate::playback::runner;
use crate::playback::session::PlaybackSession;

/// A one-shot live-stream write into a universe.
#[derive(Debug, Clone)]
pub struct DmxEvent {
    pub universe: UniverseId,
    pub channel_offset: u16,
    pub data: Vec<u8>,
}

/// Everything the event loop knows how to dispatch.
pub enum Event {
    /// Drives one frame of a playback session, then reschedules itself.
    PlaybackRunner {
        session: Arc<PlaybackSession>,
        next_frame: FrameNum,
    },
    /// Applies a live stream fragment for exactly one tick.
    Dmx(DmxEvent),
    /// Tells API-layer caches to drop their copies.
    CacheInvalidate(CacheKind),
    /// Announces a status light change.
    StatusLight { light: StatusLight, on: bool },
}

impl Event {
    /// Short name for logging.
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Event::PlaybackRunner { .. } => "playback_runner",
            Event::Dmx(_) => "dmx",
            Event::CacheInvalidate(_) => "cache_invalidate",
            Event::StatusLight { .. } => "status_light",
        }
    }

    /// Executes the event against the loop's context.
    pub(crate) fn dispatch(self, core: &mut Core) -> ServerResult<()> {
        match self {
            Event::PlaybackRunner {
                session,
                next_frame,
            } => runner::run_frame(&session, next_frame, core),
            Event::Dmx(event) => {
                let universe = core.universes.get_or_create(event.universe)?;
                universe.write_stream(event.channel_offset, &event.data)
            }
            Event::CacheInvalidate(cache) => {
                core.emitter.emit(ServerEvent::CacheInvalidated { cache });
                Ok(())
            }
            Event::StatusLight { light, on } => {
                core.emitter.emit(ServerEvent::StatusLight { light, on });
                Ok(())
            }
        }
    }
}
