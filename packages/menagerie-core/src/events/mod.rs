//! Outbound domain events for API-layer clients.
//!
//! The playback core reports state changes (cache invalidations, status
//! lights, playlist progress) through the [`EventEmitter`] trait rather
//! than a concrete channel, so the WebSocket layer, a desktop frontend,
//! or a test can each subscribe their own way.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::model::PlaylistStatus;

/// Caches the external API layer maintains that the core can invalidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheKind {
    Animation,
    Creature,
    Playlist,
    SoundList,
}

/// Status lights on the front of the server chassis.
///
/// The GPIO driver is an external collaborator; the core only announces
/// desired states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusLight {
    /// Server process alive.
    Running,
    /// DMX frames flowing.
    Dmx,
    /// An animation is playing somewhere.
    Animation,
    /// An operator console is streaming live frames.
    Streaming,
}

/// A domain event emitted by the playback core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerEvent {
    CacheInvalidated { cache: CacheKind },
    StatusLight { light: StatusLight, on: bool },
    PlaylistStatus(PlaylistStatus),
}

/// Trait for emitting domain events without knowledge of transport.
pub trait EventEmitter: Send + Sync {
    /// Emits one domain event. Implementations must not block; slow
    /// consumers are the transport's problem.
    fn emit(&self, event: ServerEvent);
}

/// Emitter backed by a tokio broadcast channel.
///
/// The API layer subscribes via [`BroadcastEmitter::subscribe`]; events
/// with no subscribers are silently dropped, which is the desired
/// behavior for a headless deployment.
pub struct BroadcastEmitter {
    tx: broadcast::Sender<ServerEvent>,
}

impl BroadcastEmitter {
    /// Creates an emitter with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Returns a new receiver for this emitter's events.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.tx.subscribe()
    }
}

impl EventEmitter for BroadcastEmitter {
    fn emit(&self, event: ServerEvent) {
        // Err means no receivers; nothing to do.
        let _ = self.tx.send(event);
    }
}

/// No-op emitter for tests and tools that don't care about events.
pub struct NoopEmitter;

impl EventEmitter for NoopEmitter {
    fn emit(&self, _event: ServerEvent) {}
}
