//! Explicit core context and service bootstrap.
//!
//! There are no process-wide singletons: everything the event loop
//! touches lives in one [`Core`] struct owned by the loop task, and
//! everything callers touch comes back from [`bootstrap`] as a bundle
//! of handles.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::audio::{AudioCache, RtpTransport, UdpEndpointPool};
use crate::clock::FrameClock;
use crate::directory::{AnimationProvider, CreatureDirectory, PlaylistProvider};
use crate::dmx::{DatagramSink, DmxTransport, UdpSink, UniverseRegistry};
use crate::error::{ServerError, ServerResult};
use crate::eventloop::{EventLoop, EventLoopHandle};
use crate::events::EventEmitter;
use crate::ingress::StreamIngress;
use crate::playback::{CooperativeScheduler, PlaylistRegistry, SessionManager};
use crate::runtime::TaskSpawner;
use crate::state::{AudioMode, Config};

/// Everything event dispatch needs, owned by the loop task.
pub struct Core {
    pub handle: EventLoopHandle,
    pub universes: Arc<UniverseRegistry>,
    pub dmx: DmxTransport,
    pub rtp: RtpTransport,
    pub sessions: Arc<SessionManager>,
    pub emitter: Arc<dyn EventEmitter>,
}

impl Core {
    /// Flushes both transports at the end of a tick: one E1.31 packet
    /// per universe, then the tick's queued audio.
    pub(crate) fn flush_tick(&mut self) {
        self.dmx.flush(&self.universes);
        self.rtp.flush();
    }
}

/// External collaborators handed to [`bootstrap`].
pub struct Seams {
    pub directory: Arc<dyn CreatureDirectory>,
    pub animations: Arc<dyn AnimationProvider>,
    pub playlists: Arc<dyn PlaylistProvider>,
    pub emitter: Arc<dyn EventEmitter>,
    pub spawner: Arc<dyn TaskSpawner>,
}

/// Handles for driving the playback core from the outside.
pub struct CoreServices {
    pub handle: EventLoopHandle,
    pub clock: FrameClock,
    pub sessions: Arc<SessionManager>,
    pub scheduler: Arc<CooperativeScheduler>,
    pub playlists: Arc<PlaylistRegistry>,
    pub ingress: Arc<StreamIngress>,
    pub universes: Arc<UniverseRegistry>,
    pub audio_cache: Option<Arc<AudioCache>>,
    pub shutdown: CancellationToken,
}

/// Wires the playback core together with real UDP sinks.
///
/// Must be called from within a tokio runtime (the sockets register
/// with it). The returned [`EventLoop`] and [`Core`] are handed to a
/// dedicated task: `tokio::spawn(event_loop.run(core))`.
pub fn bootstrap(config: &Config, seams: Seams) -> ServerResult<(CoreServices, EventLoop, Core)> {
    let dmx_sink = Box::new(UdpSink::new(config.network_interface)?);
    let rtp_sink = Box::new(UdpEndpointPool::new(config.network_interface));
    bootstrap_with_sinks(config, seams, dmx_sink, rtp_sink)
}

/// [`bootstrap`] with injectable sinks, used by tests and tools that
/// must not touch the network.
pub fn bootstrap_with_sinks(
    config: &Config,
    seams: Seams,
    dmx_sink: Box<dyn DatagramSink>,
    rtp_sink: Box<dyn DatagramSink>,
) -> ServerResult<(CoreServices, EventLoop, Core)> {
    config.validate().map_err(ServerError::InvalidData)?;

    let clock = FrameClock::new(Duration::from_millis(config.tick_period_ms));
    let shutdown = CancellationToken::new();
    let (event_loop, handle) = EventLoop::new(clock.clone(), shutdown.clone());

    let universes = Arc::new(UniverseRegistry::new());
    let cid = config.cid.unwrap_or_else(Uuid::new_v4);
    let dmx = DmxTransport::new(
        cid,
        &config.source_name,
        config.unicast_bindings.clone(),
        dmx_sink,
    );
    let rtp = RtpTransport::new(
        config.audio.mode,
        config.audio.fragment_packets,
        config.audio.multicast_group,
        rtp_sink,
    );

    let sessions = SessionManager::new();
    let audio_cache = match config.audio.mode {
        AudioMode::None => None,
        _ => Some(Arc::new(AudioCache::new(&config.audio.sound_directory)?)),
    };

    let animation_delay_frames =
        clock.frames_in(Duration::from_millis(config.scheduler.animation_delay_ms));
    let scheduler = CooperativeScheduler::new(
        handle.clone(),
        sessions.clone(),
        seams.directory.clone(),
        audio_cache.clone(),
        seams.emitter.clone(),
        animation_delay_frames,
    );

    let playlists = PlaylistRegistry::new(
        seams.playlists,
        seams.animations,
        scheduler.clone(),
        sessions.clone(),
        seams.emitter.clone(),
        seams.spawner,
    );
    let ingress = StreamIngress::new(handle.clone(), seams.directory);

    let core = Core {
        handle: handle.clone(),
        universes: universes.clone(),
        dmx,
        rtp,
        sessions: sessions.clone(),
        emitter: seams.emitter,
    };

    let services = CoreServices {
        handle,
        clock,
        sessions,
        scheduler,
        playlists,
        ingress,
        universes,
        audio_cache,
        shutdown,
    };

    Ok((services, event_loop, core))
}
