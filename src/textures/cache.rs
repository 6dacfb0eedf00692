//! In-memory cache of decoded textures
//!
//! Keyed by canonical path and invalidated when the file's size or
//! modification time changes, so repeated decodes of an unchanged texture
//! skip the codec. The least recently used entry is dropped once the cache
//! holds more than its capacity.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::SystemTime;
use tracing::debug;

use super::dispatch::TextureCodec;
use super::error::{CodecError, CodecResult};
use super::metadata::ContainerMetadata;
use super::pixels::PixelBuffer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Stamp {
    modified: Option<SystemTime>,
    len: u64,
}

impl Stamp {
    fn of(path: &Path) -> CodecResult<Self> {
        let meta = std::fs::metadata(path).map_err(|e| CodecError::io(path, e))?;
        Ok(Self {
            modified: meta.modified().ok(),
            len: meta.len(),
        })
    }
}

struct Entry {
    stamp: Stamp,
    pixels: PixelBuffer,
    metadata: ContainerMetadata,
    last_used: u64,
}

/// Entries kept by [`DecodeCache::new`]
pub const DEFAULT_CACHE_CAPACITY: usize = 64;

/// Cache statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
    pub entries: usize,
}

/// Thread-safe decode cache
pub struct DecodeCache {
    entries: Mutex<HashMap<PathBuf, Entry>>,
    capacity: usize,
    clock: AtomicU64,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl Default for DecodeCache {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CACHE_CAPACITY)
    }
}

impl DecodeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache holding at most `capacity` decoded textures (minimum one)
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
            clock: AtomicU64::new(0),
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
        }
    }

    fn key(path: &Path) -> CodecResult<PathBuf> {
        std::fs::canonicalize(path).map_err(|e| CodecError::io(path, e))
    }

    /// Return the cached decode for `path`, decoding with `codec` on a miss
    pub fn get_or_decode(
        &self,
        codec: &TextureCodec,
        path: &Path,
    ) -> CodecResult<(PixelBuffer, ContainerMetadata)> {
        let key = Self::key(path)?;
        let stamp = Stamp::of(&key)?;
        let tick = self.clock.fetch_add(1, Ordering::Relaxed);

        if let Ok(mut entries) = self.entries.lock() {
            if let Some(entry) = entries.get_mut(&key).filter(|e| e.stamp == stamp) {
                entry.last_used = tick;
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok((entry.pixels.clone(), entry.metadata.clone()));
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!("Decode cache miss: {}", path.display());

        // Decode outside the lock; concurrent misses on one path just race to insert
        let (pixels, metadata) = codec.decode(path)?;
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(
                key,
                Entry {
                    stamp,
                    pixels: pixels.clone(),
                    metadata: metadata.clone(),
                    last_used: tick,
                },
            );
            evict_to(&mut entries, self.capacity);
        }
        Ok((pixels, metadata))
    }

    pub fn invalidate(&self, path: &Path) {
        let key = Self::key(path).unwrap_or_else(|_| path.to_path_buf());
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(&key);
        }
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.entries.lock().map(|e| e.len()).unwrap_or(0),
        }
    }
}

/// Drop least recently used entries until at most `capacity` remain
fn evict_to(entries: &mut HashMap<PathBuf, Entry>, capacity: usize) {
    while entries.len() > capacity {
        let Some(oldest) = entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_used)
            .map(|(key, _)| key.clone())
        else {
            break;
        };
        debug!("Decode cache evicting {}", oldest.display());
        entries.remove(&oldest);
    }
}
