//! On-disk cache of pre-encoded Opus audio.
//!
//! Encoding a long WAV into 17 Opus channel streams takes real time, so
//! the result is persisted next to the sound files:
//!
//! ```text
//! <sound_dir>/.opus_cache/<hostname>/<source_stem>/ch00.opus .. ch16.opus
//! ```
//!
//! Each file is a length-prefixed metadata blob (`{path, size, sha256}`
//! of the source), a u32 frame count, a u32 frame-size table, and the
//! concatenated Opus frames. A cache entry is valid only as an atomic
//! triple: all 17 files present, metadata matching the current source
//! file, and frame counts agreeing across channels; anything less means
//! a full re-encode. The hostname scoping keeps shared NFS sound
//! directories from mixing cache entries across machines.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::{Buf, BufMut, BytesMut};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{ServerError, ServerResult};
use crate::protocol_constants::RTP_CHANNEL_COUNT;

use super::encoder::{encode_wav_file, EncodedAudio};

/// Identity of a source sound file at encode time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct SourceInfo {
    path: String,
    size: u64,
    sha256: String,
}

/// Aggregate cache statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Number of files currently in this host's cache directory.
    pub cached_files: u64,
    /// Total bytes those files occupy.
    pub disk_usage: u64,
}

/// Disk-backed (plus in-memory memoized) store of encoded audio.
pub struct AudioCache {
    sound_dir: PathBuf,
    cache_dir: PathBuf,
    /// Serializes writers; concurrent encodes of the same source would
    /// otherwise interleave their tmp files.
    write_lock: Mutex<()>,
    memo: DashMap<String, Arc<EncodedAudio>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl AudioCache {
    /// Opens the cache under `<sound_dir>/.opus_cache/<hostname>`,
    /// creating it and verifying it is writable.
    pub fn new(sound_dir: &Path) -> ServerResult<Self> {
        let host = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown-host".to_string());
        let cache_dir = sound_dir.join(".opus_cache").join(&host);

        fs::create_dir_all(&cache_dir)?;
        let probe = cache_dir.join(".write_test");
        fs::write(&probe, b"ok").map_err(|e| {
            ServerError::Forbidden(format!(
                "cache directory {} is not writable: {}",
                cache_dir.display(),
                e
            ))
        })?;
        let _ = fs::remove_file(&probe);

        log::debug!(
            "audio cache ready in {} (hostname: {})",
            cache_dir.display(),
            host
        );

        Ok(Self {
            sound_dir: sound_dir.to_path_buf(),
            cache_dir,
            write_lock: Mutex::new(()),
            memo: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }

    /// Returns the encoded audio for a sound file, from memory, disk,
    /// or a fresh encode (in that order).
    ///
    /// A failed disk write is logged and swallowed; the freshly encoded
    /// data is still returned so playback can proceed.
    pub fn load_or_encode(
        &self,
        sound_file: &str,
        multitrack: bool,
    ) -> ServerResult<Arc<EncodedAudio>> {
        if let Some(cached) = self.memo.get(sound_file) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(cached.value().clone());
        }

        let source = self.sound_dir.join(sound_file);
        if !source.is_file() {
            return Err(ServerError::NotFound(format!(
                "sound file {}",
                source.display()
            )));
        }
        let info = self.source_info(&source)?;

        if let Some(loaded) = self.try_load(&source, &info) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            let loaded = Arc::new(loaded);
            self.memo.insert(sound_file.to_string(), loaded.clone());
            log::debug!(
                "cache hit: {} ({} frames)",
                source.display(),
                loaded.frames_per_channel
            );
            return Ok(loaded);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        log::info!("cache miss, encoding {}", source.display());
        let encoded = Arc::new(encode_wav_file(&source, multitrack)?);

        if let Err(e) = self.store(&source, &info, &encoded) {
            log::warn!("failed to persist cache for {}: {}", source.display(), e);
        }
        self.memo.insert(sound_file.to_string(), encoded.clone());
        Ok(encoded)
    }

    /// Hit/miss counters plus a walk of the cache directory for disk
    /// usage. The walk is best-effort; unreadable entries are skipped.
    pub fn stats(&self) -> CacheStats {
        let mut stats = CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            cached_files: 0,
            disk_usage: 0,
        };

        let entries = match fs::read_dir(&self.cache_dir) {
            Ok(entries) => entries,
            Err(_) => return stats,
        };
        for entry in entries.flatten() {
            let Ok(files) = fs::read_dir(entry.path()) else {
                continue;
            };
            for file in files.flatten() {
                if let Ok(meta) = file.metadata() {
                    if meta.is_file() {
                        stats.cached_files += 1;
                        stats.disk_usage += meta.len();
                    }
                }
            }
        }
        stats
    }

    // ─────────────────────────────────────────────────────────────────────
    // Paths and source identity
    // ─────────────────────────────────────────────────────────────────────

    fn entry_dir(&self, source: &Path) -> PathBuf {
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unnamed".to_string());
        self.cache_dir.join(stem)
    }

    fn channel_path(entry: &Path, channel: u8) -> PathBuf {
        entry.join(format!("ch{:02}.opus", channel))
    }

    fn source_info(&self, source: &Path) -> ServerResult<SourceInfo> {
        let meta = fs::metadata(source)?;
        let mut hasher = Sha256::new();
        let mut file = fs::File::open(source)?;
        std::io::copy(&mut file, &mut hasher)?;
        let digest = hasher.finalize();
        let sha256 = digest.iter().fold(String::with_capacity(64), |mut s, b| {
            use std::fmt::Write;
            let _ = write!(s, "{:02x}", b);
            s
        });
        Ok(SourceInfo {
            path: source.to_string_lossy().into_owned(),
            size: meta.len(),
            sha256,
        })
    }

    // ─────────────────────────────────────────────────────────────────────
    // Disk format
    // ─────────────────────────────────────────────────────────────────────

    fn serialize_channel(info: &SourceInfo, frames: &[Vec<u8>]) -> ServerResult<Vec<u8>> {
        let metadata = serde_json::to_vec(info).map_err(ServerError::internal)?;
        let payload: usize = frames.iter().map(Vec::len).sum();
        let mut buf =
            BytesMut::with_capacity(8 + metadata.len() + frames.len() * 4 + payload);

        buf.put_u32_le(metadata.len() as u32);
        buf.put_slice(&metadata);
        buf.put_u32_le(frames.len() as u32);
        for frame in frames {
            buf.put_u32_le(frame.len() as u32);
        }
        for frame in frames {
            buf.put_slice(frame);
        }
        Ok(buf.to_vec())
    }

    fn deserialize_channel(data: &[u8]) -> Option<(SourceInfo, Vec<Vec<u8>>)> {
        let mut buf = data;
        if buf.remaining() < 4 {
            return None;
        }
        let meta_len = buf.get_u32_le() as usize;
        if buf.remaining() < meta_len {
            return None;
        }
        let info: SourceInfo = serde_json::from_slice(&buf[..meta_len]).ok()?;
        buf.advance(meta_len);

        if buf.remaining() < 4 {
            return None;
        }
        let frame_count = buf.get_u32_le() as usize;
        if buf.remaining() < frame_count * 4 {
            return None;
        }
        let sizes: Vec<usize> = (0..frame_count).map(|_| buf.get_u32_le() as usize).collect();

        let mut frames = Vec::with_capacity(frame_count);
        for size in sizes {
            if buf.remaining() < size {
                return None;
            }
            frames.push(buf[..size].to_vec());
            buf.advance(size);
        }
        Some((info, frames))
    }

    // ─────────────────────────────────────────────────────────────────────
    // Load / store
    // ─────────────────────────────────────────────────────────────────────

    /// Loads a complete cache entry, or `None` on any inconsistency.
    /// Stale or corrupt entries are removed so the next encode starts
    /// from a clean slate.
    fn try_load(&self, source: &Path, current: &SourceInfo) -> Option<EncodedAudio> {
        let entry = self.entry_dir(source);

        for channel in 0..RTP_CHANNEL_COUNT {
            if !Self::channel_path(&entry, channel).is_file() {
                return None;
            }
        }

        let mut channels = Vec::with_capacity(RTP_CHANNEL_COUNT as usize);
        let mut expected_frames = None;
        for channel in 0..RTP_CHANNEL_COUNT {
            let data = fs::read(Self::channel_path(&entry, channel)).ok()?;
            let Some((info, frames)) = Self::deserialize_channel(&data) else {
                log::warn!("corrupt cache file for {}, re-encoding", source.display());
                self.clear_entry(source);
                return None;
            };
            if info != *current {
                log::debug!("cache stale for {} (source changed)", source.display());
                self.clear_entry(source);
                return None;
            }
            match expected_frames {
                None => expected_frames = Some(frames.len()),
                Some(n) if n != frames.len() => {
                    log::warn!(
                        "inconsistent frame counts in cache for {}, re-encoding",
                        source.display()
                    );
                    self.clear_entry(source);
                    return None;
                }
                _ => {}
            }
            channels.push(frames);
        }

        Some(EncodedAudio {
            frames_per_channel: expected_frames.unwrap_or(0),
            channels,
        })
    }

    /// Writes all 17 channel files. Each file goes through a tmp path
    /// and atomic rename; any failure removes the whole entry.
    fn store(&self, source: &Path, info: &SourceInfo, audio: &EncodedAudio) -> ServerResult<()> {
        let _guard = self.write_lock.lock();
        let entry = self.entry_dir(source);
        fs::create_dir_all(&entry)?;

        let result = (|| -> ServerResult<()> {
            for (channel, frames) in audio.channels.iter().enumerate() {
                let data = Self::serialize_channel(info, frames)?;
                let path = Self::channel_path(&entry, channel as u8);
                let tmp = path.with_extension("opus.tmp");
                fs::write(&tmp, &data)?;
                fs::rename(&tmp, &path)?;
            }
            Ok(())
        })();

        if result.is_err() {
            self.clear_entry(source);
        } else {
            log::info!(
                "cached {} frames for {}",
                audio.frames_per_channel,
                source.display()
            );
        }
        result
    }

    fn clear_entry(&self, source: &Path) {
        let entry = self.entry_dir(source);
        if entry.exists() {
            if let Err(e) = fs::remove_dir_all(&entry) {
                log::warn!("failed to clear cache entry {}: {}", entry.display(), e);
            }
        }
    }
}
