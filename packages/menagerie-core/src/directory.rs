//! Trait seams for the external document store.
//!
//! Creatures, animations, and playlists live in a persistent store the
//! core never talks to directly. The playback subsystem sees them only
//! through these lookup traits; the server binary wires in a static
//! in-memory directory, tests use the same one.

use std::sync::Arc;

use dashmap::DashMap;

use crate::error::{ServerError, ServerResult};
use crate::model::{Animation, AnimationId, Creature, CreatureId, Playlist, PlaylistId};

/// Resolves creature ids to their DMX and audio addressing.
pub trait CreatureDirectory: Send + Sync {
    /// Looks up a creature by id.
    fn creature(&self, id: &str) -> ServerResult<Creature>;
}

/// Fetches stored animations for playlist playback.
pub trait AnimationProvider: Send + Sync {
    /// Looks up an animation by id.
    fn animation(&self, id: &str) -> ServerResult<Animation>;
}

/// Fetches stored playlists.
pub trait PlaylistProvider: Send + Sync {
    /// Looks up a playlist by id.
    fn playlist(&self, id: &str) -> ServerResult<Playlist>;
}

/// In-memory directory backing all three lookup seams.
///
/// The standalone server populates this from its configuration file;
/// tests populate it directly.
#[derive(Default)]
pub struct StaticDirectory {
    creatures: DashMap<CreatureId, Creature>,
    animations: DashMap<AnimationId, Animation>,
    playlists: DashMap<PlaylistId, Playlist>,
}

impl StaticDirectory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert_creature(&self, creature: Creature) {
        self.creatures.insert(creature.id.clone(), creature);
    }

    pub fn insert_animation(&self, animation: Animation) {
        self.animations.insert(animation.id.clone(), animation);
    }

    pub fn insert_playlist(&self, playlist: Playlist) {
        self.playlists.insert(playlist.id.clone(), playlist);
    }

    /// Number of known creatures (for startup logging).
    pub fn creature_count(&self) -> usize {
        self.creatures.len()
    }
}

impl CreatureDirectory for StaticDirectory {
    fn creature(&self, id: &str) -> ServerResult<Creature> {
        self.creatures
            .get(id)
            .map(|r| r.value().clone())
            .ok_or_else(|| ServerError::NotFound(format!("creature '{}'", id)))
    }
}

impl AnimationProvider for StaticDirectory {
    fn animation(&self, id: &str) -> ServerResult<Animation> {
        self.animations
            .get(id)
            .map(|r| r.value().clone())
            .ok_or_else(|| ServerError::NotFound(format!("animation '{}'", id)))
    }
}

impl PlaylistProvider for StaticDirectory {
    fn playlist(&self, id: &str) -> ServerResult<Playlist> {
        self.playlists
            .get(id)
            .map(|r| r.value().clone())
            .ok_or_else(|| ServerError::NotFound(format!("playlist '{}'", id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_creature(id: &str) -> Creature {
        Creature {
            id: id.to_string(),
            name: "Beaky".into(),
            universe: 7,
            channel_offset: 1,
            audio_channel: 1,
            audio_endpoint: None,
        }
    }

    #[test]
    fn creature_lookup_round_trips() {
        let dir = StaticDirectory::new();
        dir.insert_creature(test_creature("c1"));

        let found = dir.creature("c1").unwrap();
        assert_eq!(found.universe, 7);
        assert_eq!(found.channel_offset, 1);
    }

    #[test]
    fn unknown_creature_is_not_found() {
        let dir = StaticDirectory::new();
        let err = dir.creature("ghost").unwrap_err();
        assert_eq!(err.code(), "not_found");
    }

    #[test]
    fn unknown_animation_is_not_found() {
        let dir = StaticDirectory::new();
        assert!(dir.animation("missing").is_err());
    }

    #[test]
    fn unknown_playlist_is_not_found() {
        let dir = StaticDirectory::new();
        assert!(dir.playlist("missing").is_err());
    }
}
