//! Live stream ingress.
//!
//! Operator consoles stream one frame of servo positions per creature
//! roughly every tick. Each fragment is resolved to a universe and
//! channel offset, validated, and scheduled as a one-shot DMX event on
//! the immediate next tick. Because stream writes outrank animation
//! writes in the merge, live input visibly overrides a playing
//! animation without cancelling it, and stops showing the moment the
//! operator stops sending.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::directory::CreatureDirectory;
use crate::error::{ServerError, ServerResult};
use crate::eventloop::{DmxEvent, Event, EventLoopHandle};
use crate::model::StreamFrame;
use crate::protocol_constants::{DMX_PROPERTY_COUNT, STREAM_LOG_INTERVAL};

/// Accepts live per-frame fragments and feeds them to the event loop.
pub struct StreamIngress {
    handle: EventLoopHandle,
    directory: Arc<dyn CreatureDirectory>,
    frames_streamed: AtomicU64,
}

impl StreamIngress {
    pub fn new(handle: EventLoopHandle, directory: Arc<dyn CreatureDirectory>) -> Arc<Self> {
        Arc::new(Self {
            handle,
            directory,
            frames_streamed: AtomicU64::new(0),
        })
    }

    /// Validates one fragment and schedules it for the next tick.
    pub fn stream_frame(&self, frame: StreamFrame) -> ServerResult<()> {
        let creature = self.directory.creature(&frame.creature_id)?;

        if frame.data.is_empty() {
            return Err(ServerError::InvalidData(format!(
                "empty stream fragment for creature '{}'",
                frame.creature_id
            )));
        }
        let offset = creature.channel_offset;
        if offset == 0 || offset as usize + frame.data.len() > DMX_PROPERTY_COUNT {
            return Err(ServerError::InvalidData(format!(
                "fragment of {} bytes at offset {} does not fit universe {}",
                frame.data.len(),
                offset,
                frame.universe
            )));
        }

        self.handle.schedule(
            Event::Dmx(DmxEvent {
                universe: frame.universe,
                channel_offset: offset,
                data: frame.data,
            }),
            self.handle.next_frame(),
        );

        let total = self.frames_streamed.fetch_add(1, Ordering::Relaxed) + 1;
        if total % STREAM_LOG_INTERVAL == 0 {
            log::debug!("streamed {} frames", total);
        }
        Ok(())
    }

    /// Total fragments accepted since startup.
    pub fn frames_streamed(&self) -> u64 {
        self.frames_streamed.load(Ordering::Relaxed)
    }
}
