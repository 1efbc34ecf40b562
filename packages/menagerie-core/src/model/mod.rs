//! Domain model types shared across the playback core.
//!
//! These are plain data carriers; persistence and DTO conversion live in
//! the external API layer. Validation here covers only what playback
//! itself depends on.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::error::{ServerError, ServerResult};
use crate::protocol_constants::DMX_SLOT_COUNT;

/// A DMX universe number (1..=63999).
pub type UniverseId = u32;

/// A frame number on the global tick clock. 0 at startup, +1 per tick.
pub type FrameNum = u64;

/// Opaque creature identifier.
pub type CreatureId = String;

/// Opaque animation identifier.
pub type AnimationId = String;

/// Opaque playlist identifier.
pub type PlaylistId = String;

// ─────────────────────────────────────────────────────────────────────────────
// Creatures
// ─────────────────────────────────────────────────────────────────────────────

/// One animatronic creature as known to the creature directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Creature {
    pub id: CreatureId,
    pub name: String,
    /// Universe this creature's servos live on.
    pub universe: UniverseId,
    /// First DMX slot of this creature's servo block (1..=512).
    pub channel_offset: u16,
    /// Audio stem channel (1..=16) carrying this creature's voice.
    pub audio_channel: u8,
    /// Where this creature listens for RTP audio, if it has a speaker.
    #[serde(default)]
    pub audio_endpoint: Option<SocketAddr>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Animations
// ─────────────────────────────────────────────────────────────────────────────

/// Metadata describing one stored animation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnimationMetadata {
    pub title: String,
    /// Frame cadence of the stored data. The playback core runs at
    /// 20 ms; anything else is rejected at scheduling time.
    pub milliseconds_per_frame: u32,
    /// Free-form operator note.
    #[serde(default)]
    pub note: String,
    /// Sound file to stream alongside the servo data, relative to the
    /// configured sound directory.
    #[serde(default)]
    pub sound_file: Option<String>,
    pub number_of_frames: u32,
    /// True when the sound file carries per-creature stems rather than
    /// a plain mix.
    #[serde(default)]
    pub multitrack_audio: bool,
}

/// Servo motion data for one creature within an animation.
///
/// Each frame is a byte vector of servo positions, written to the DMX
/// universe starting at the creature's channel offset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Track {
    pub creature_id: CreatureId,
    pub frames: Vec<Vec<u8>>,
}

/// One stored animation: metadata plus one track per creature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Animation {
    pub id: AnimationId,
    pub metadata: AnimationMetadata,
    pub tracks: Vec<Track>,
}

impl Animation {
    /// Validates the internal consistency of the animation payload.
    ///
    /// Checks what playback depends on: every track has exactly
    /// `number_of_frames` frames, and every frame fits inside a
    /// universe. Channel offsets are validated later against the
    /// creature directory.
    pub fn validate(&self) -> ServerResult<()> {
        let expected = self.metadata.number_of_frames as usize;
        for track in &self.tracks {
            if track.frames.len() != expected {
                return Err(ServerError::InvalidData(format!(
                    "animation '{}': track for creature '{}' has {} frames, expected {}",
                    self.id,
                    track.creature_id,
                    track.frames.len(),
                    expected
                )));
            }
            for (k, frame) in track.frames.iter().enumerate() {
                if frame.is_empty() || frame.len() > DMX_SLOT_COUNT {
                    return Err(ServerError::InvalidData(format!(
                        "animation '{}': frame {} for creature '{}' has invalid size {}",
                        self.id,
                        k,
                        track.creature_id,
                        frame.len()
                    )));
                }
            }
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Live streaming
// ─────────────────────────────────────────────────────────────────────────────

/// One real-time control fragment sent by an operator console.
///
/// Unlike a [`Track`] frame this is not tied to any animation; it is a
/// single frame of servo positions applied on the next tick only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamFrame {
    pub creature_id: CreatureId,
    pub universe: UniverseId,
    pub data: Vec<u8>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Playlists
// ─────────────────────────────────────────────────────────────────────────────

/// An ordered, looping list of animations for one universe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Playlist {
    pub id: PlaylistId,
    pub name: String,
    pub animation_ids: Vec<AnimationId>,
}

/// Snapshot of playlist playback on a universe, reported to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistStatus {
    pub universe: UniverseId,
    pub playlist: PlaylistId,
    pub playing: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_animation: Option<AnimationId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_frame_animation() -> Animation {
        Animation {
            id: "anim-A".into(),
            metadata: AnimationMetadata {
                title: "Wave".into(),
                milliseconds_per_frame: 20,
                number_of_frames: 3,
                ..Default::default()
            },
            tracks: vec![Track {
                creature_id: "beaky".into(),
                frames: vec![vec![0x10, 0x20], vec![0x11, 0x21], vec![0x12, 0x22]],
            }],
        }
    }

    #[test]
    fn valid_animation_passes() {
        assert!(three_frame_animation().validate().is_ok());
    }

    #[test]
    fn frame_count_mismatch_is_invalid_data() {
        let mut anim = three_frame_animation();
        anim.tracks[0].frames.pop();
        let err = anim.validate().unwrap_err();
        assert_eq!(err.code(), "invalid_data");
    }

    #[test]
    fn empty_frame_is_rejected() {
        let mut anim = three_frame_animation();
        anim.tracks[0].frames[1] = vec![];
        assert!(anim.validate().is_err());
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let mut anim = three_frame_animation();
        anim.tracks[0].frames[0] = vec![0u8; DMX_SLOT_COUNT + 1];
        assert!(anim.validate().is_err());
    }

    #[test]
    fn playlist_status_serializes_camel_case() {
        let status = PlaylistStatus {
            universe: 3,
            playlist: "p1".into(),
            playing: true,
            current_animation: Some("anim-A".into()),
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["currentAnimation"], "anim-A");
        assert_eq!(json["playing"], true);
    }
}
