//! The cooperative playback runner.
//!
//! Instead of bulk-scheduling every frame of an animation up front, a
//! single runner event drives one frame per tick and reschedules itself
//! for the next, keeping the event queue depth at O(1) per playing
//! session and making cancellation effective within one tick.

use std::sync::Arc;

use crate::core::Core;
use crate::error::ServerResult;
use crate::eventloop::Event;
use crate::model::FrameNum;
use crate::protocol_constants::OPUS_FRAME_SAMPLES;

use super::session::{EndReason, PlaybackSession};

/// Advances a session by one frame. Called by the event loop when the
/// session's runner event comes due.
pub(crate) fn run_frame(
    session: &Arc<PlaybackSession>,
    next_frame: FrameNum,
    core: &mut Core,
) -> ServerResult<()> {
    // A cancelled session ends here; at most one tick after cancel().
    if session.is_cancelled() {
        log::debug!(
            "session '{}' on universe {} observed cancel at frame {}",
            session.animation_id,
            session.universe,
            next_frame
        );
        session.finish(EndReason::Cancelled);
        core.sessions
            .clear_session_if_current(session.universe, session);
        return Ok(());
    }

    let k = next_frame.saturating_sub(session.start_frame);

    // Zero-length sessions (and any overshoot) complete without ever
    // starting.
    if k >= session.length_frames {
        session.finish(EndReason::Completed);
        core.sessions
            .clear_session_if_current(session.universe, session);
        return Ok(());
    }

    if k == 0 {
        session.notify_start(next_frame);
    }

    if let Err(e) = write_dmx_frame(session, k as usize, core) {
        session.finish(EndReason::Error);
        core.sessions
            .clear_session_if_current(session.universe, session);
        return Err(e);
    }

    session.notify_frame(next_frame);

    queue_audio_frame(session, k, core);

    if k + 1 < session.length_frames {
        core.handle.schedule(
            Event::PlaybackRunner {
                session: session.clone(),
                next_frame: next_frame + 1,
            },
            next_frame + 1,
        );
    } else {
        session.finish(EndReason::Completed);
        core.sessions
            .clear_session_if_current(session.universe, session);
    }
    Ok(())
}

/// Writes this frame's servo positions for every track.
fn write_dmx_frame(session: &PlaybackSession, k: usize, core: &mut Core) -> ServerResult<()> {
    let universe = core.universes.get_or_create(session.universe)?;
    for track in &session.tracks {
        if let Some(frame) = track.frames.get(k) {
            universe.write(session.layer, track.channel_offset, frame)?;
        }
    }
    Ok(())
}

/// Hands this tick's Opus frames to the RTP transport: channel 0 to the
/// multicast group, each routed stem to its creature.
///
/// Audio faults never kill the session; the tick's audio is silence and
/// one log line per session records the fact.
fn queue_audio_frame(session: &Arc<PlaybackSession>, k: FrameNum, core: &mut Core) {
    let Some(audio) = &session.audio else {
        return;
    };
    if k as usize >= audio.buffer.frames_per_channel {
        return;
    }

    let timestamp = audio
        .rtp_base
        .wrapping_add((k as u32).wrapping_mul(OPUS_FRAME_SAMPLES as u32));

    match audio.buffer.frame(0, k as usize) {
        Some(payload) => core.rtp.queue_downmix(timestamp, payload),
        None => {
            if session.note_audio_fault() {
                log::error!(
                    "session '{}': missing downmix frame {}; dropping audio for this tick",
                    session.animation_id,
                    k
                );
            }
        }
    }

    for route in &audio.routes {
        match audio.buffer.frame(route.channel, k as usize) {
            Some(payload) => core.rtp.queue_stem(route.dest, timestamp, payload),
            None => {
                if session.note_audio_fault() {
                    log::error!(
                        "session '{}': missing frame {} on channel {}; dropping audio for this tick",
                        session.animation_id,
                        k,
                        route.channel
                    );
                }
            }
        }
    }
}
