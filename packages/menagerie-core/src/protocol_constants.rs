//! Fixed protocol constants that should NOT be changed.
//!
//! These values are defined by external specifications (E1.31/sACN, RTP,
//! Opus) and changing them would break protocol compliance with the
//! creatures in the field.

// ─────────────────────────────────────────────────────────────────────────────
// E1.31 (sACN - Streaming ACN, ANSI E1.31)
// ─────────────────────────────────────────────────────────────────────────────

/// Number of data slots in one DMX universe.
pub const DMX_SLOT_COUNT: usize = 512;

/// Total property values in an E1.31 DMP layer: START code + 512 slots.
pub const DMX_PROPERTY_COUNT: usize = DMX_SLOT_COUNT + 1;

/// The DMX START code. Slot 0 of every packet must carry this value.
pub const DMX_START_CODE: u8 = 0x00;

/// UDP port assigned to E1.31 by the spec.
pub const E131_PORT: u16 = 5568;

/// Default packet priority (E1.31 spec defines 100 as the default).
pub const E131_DEFAULT_PRIORITY: u8 = 100;

/// Source name field width in the framing layer (NUL-padded).
pub const E131_SOURCE_NAME_LEN: usize = 64;

/// Highest universe id addressable by E1.31.
pub const E131_MAX_UNIVERSE: u32 = 63999;

/// Total length of an E1.31 data packet carrying a full universe.
///
/// Root layer (38) + framing layer (77) + DMP layer (10 + 513).
pub const E131_PACKET_LEN: usize = 638;

// ─────────────────────────────────────────────────────────────────────────────
// Audio (Opus over RTP)
// ─────────────────────────────────────────────────────────────────────────────

/// Sample rate for all RTP audio. Opus operates natively at 48 kHz.
pub const OPUS_SAMPLE_RATE: u32 = 48_000;

/// Samples per channel in one 20 ms Opus frame at 48 kHz.
pub const OPUS_FRAME_SAMPLES: usize = 960;

/// Opus encoder bitrate (bits/second) for every channel.
///
/// Fixed so that re-encoding the same source yields byte-identical
/// cache entries across runs.
pub const OPUS_BITRATE: i32 = 96_000;

/// Number of audio channels streamed per fleet: one downmix plus
/// sixteen per-creature stems.
pub const RTP_CHANNEL_COUNT: u8 = 17;

/// Size of the fixed multi-channel audio header preceding each Opus
/// payload on the wire.
pub const RTP_HEADER_LEN: usize = 16;

/// Largest Opus payload carried in a single datagram when application
/// level fragmentation is enabled. Chosen to keep header + payload
/// under a 1500-byte Ethernet MTU with margin for IP/UDP headers.
pub const RTP_MAX_PAYLOAD: usize = 1400;

// ─────────────────────────────────────────────────────────────────────────────
// Scheduling
// ─────────────────────────────────────────────────────────────────────────────

/// Tick period of the event loop in milliseconds (50 Hz).
///
/// One tick is one DMX frame and one Opus frame; the whole system is
/// phase-locked to this quantum.
pub const DEFAULT_TICK_MS: u64 = 20;

/// Ticks of accumulated drift after which the loop re-anchors its phase
/// instead of bursting to catch up.
pub const DRIFT_RESET_TICKS: u32 = 5;

// ─────────────────────────────────────────────────────────────────────────────
// Logging cadence
// ─────────────────────────────────────────────────────────────────────────────

/// Log only every Nth DMX send failure to avoid flooding when a network
/// interface goes away.
pub const DMX_SEND_ERROR_LOG_INTERVAL: u64 = 100;

/// Streamed-frame debug log cadence (frames between log lines).
pub const STREAM_LOG_INTERVAL: u64 = 500;

// ─────────────────────────────────────────────────────────────────────────────
// Channels
// ─────────────────────────────────────────────────────────────────────────────

/// Capacity of the event broadcast channel for API-layer clients.
pub const EVENT_CHANNEL_CAPACITY: usize = 100;
