//! Menagerie Server - standalone headless playback server.
//!
//! Drives a fleet of animatronic creatures: DMX over E1.31 multicast,
//! voices over RTP, everything locked to one 20 ms tick. The creature
//! directory and animation library come from the configuration file and
//! a JSON library directory; the interactive API surface lives in a
//! separate process and is not part of this binary.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use menagerie_core::{
    bootstrap, Animation, BroadcastEmitter, Playlist, Seams, StaticDirectory, TokioSpawner,
};
use tokio::signal;

use crate::config::ServerConfig;

/// Menagerie Server - headless creature playback server.
#[derive(Parser, Debug)]
#[command(name = "menagerie-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "MENAGERIE_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Sound file directory (overrides config file).
    #[arg(short = 's', long, env = "MENAGERIE_SOUND_DIR")]
    sound_dir: Option<PathBuf>,

    /// IPv4 address of the multicast network interface (overrides
    /// config file).
    #[arg(short = 'i', long, env = "MENAGERIE_NETWORK_INTERFACE")]
    network_interface: Option<std::net::Ipv4Addr>,

    /// Explicit E1.31 CID (overrides config file; random when absent).
    #[arg(long)]
    cid: Option<uuid::Uuid>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Menagerie Server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config =
        ServerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    // Apply CLI overrides
    if let Some(sound_dir) = args.sound_dir {
        config.core.audio.sound_directory = sound_dir;
    }
    if let Some(interface) = args.network_interface {
        config.core.network_interface = Some(interface);
    }
    if let Some(cid) = args.cid {
        config.core.cid = Some(cid);
    }

    // Build the creature directory and animation library
    let directory = StaticDirectory::new();
    for creature in &config.creatures {
        directory.insert_creature(creature.clone());
    }
    log::info!("Loaded {} creatures", directory.creature_count());

    if let Some(library) = &config.library {
        let (animations, playlists) =
            load_library(library, &directory).context("Failed to load animation library")?;
        log::info!(
            "Loaded {} animations and {} playlists from {}",
            animations,
            playlists,
            library.display()
        );
    }

    // Event fan-out; the API process subscribes here in a full
    // deployment, the headless server just logs.
    let emitter = Arc::new(BroadcastEmitter::new(config.core.event_channel_capacity));
    let mut event_rx = emitter.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = event_rx.recv().await {
            log::debug!("event: {:?}", event);
        }
    });

    let seams = Seams {
        directory: directory.clone(),
        animations: directory.clone(),
        playlists: directory.clone(),
        emitter,
        spawner: Arc::new(TokioSpawner::current()),
    };

    let (services, event_loop, core) =
        bootstrap(&config.core, seams).context("Failed to bootstrap playback core")?;

    let loop_handle = tokio::spawn(event_loop.run(core));
    log::info!(
        "Playback core running (tick period {} ms)",
        config.core.tick_period_ms
    );

    // Announce the running light and kick off any startup playlists.
    services.handle.schedule(
        menagerie_core::Event::StatusLight {
            light: menagerie_core::StatusLight::Running,
            on: true,
        },
        services.handle.next_frame(),
    );

    for (universe, playlist_id) in &config.startup_playlists {
        match services.playlists.start(*universe, playlist_id).await {
            Ok(()) => log::info!(
                "Started playlist '{}' on universe {}",
                playlist_id,
                universe
            ),
            Err(e) => log::error!(
                "Could not start playlist '{}' on universe {}: {}",
                playlist_id,
                universe,
                e
            ),
        }
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    log::info!("Shutdown signal received, cleaning up...");
    services.shutdown.cancel();
    let _ = loop_handle.await;

    log::info!("Shutdown complete");
    Ok(())
}

/// Loads `animations/*.json` and `playlists/*.json` from the library
/// directory into the in-memory store.
fn load_library(library: &std::path::Path, directory: &StaticDirectory) -> Result<(usize, usize)> {
    let mut animations = 0;
    let mut playlists = 0;

    let animation_dir = library.join("animations");
    if animation_dir.is_dir() {
        for entry in std::fs::read_dir(&animation_dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                let content = std::fs::read_to_string(&path)?;
                let animation: Animation = serde_json::from_str(&content)
                    .with_context(|| format!("Invalid animation file {}", path.display()))?;
                directory.insert_animation(animation);
                animations += 1;
            }
        }
    }

    let playlist_dir = library.join("playlists");
    if playlist_dir.is_dir() {
        for entry in std::fs::read_dir(&playlist_dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                let content = std::fs::read_to_string(&path)?;
                let playlist: Playlist = serde_json::from_str(&content)
                    .with_context(|| format!("Invalid playlist file {}", path.display()))?;
                directory.insert_playlist(playlist);
                playlists += 1;
            }
        }
    }

    Ok((animations, playlists))
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
