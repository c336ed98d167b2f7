//! `KernelConfig`: the recognized environment/configuration options,
//! with an adaptive default computed from detected system resources.

use serde::{Deserialize, Serialize};
use sysinfo::{MemoryRefreshKind, RefreshKind, System};

const MB: usize = 1024 * 1024;
const GB: u64 = 1024 * 1024 * 1024;

/// Snapshot of detected hardware resources, re-probed on every
/// `detect()` call.
#[derive(Debug, Clone)]
pub struct SystemResources {
    pub total_memory_bytes: u64,
    pub available_memory_bytes: u64,
    pub cpu_count: usize,
}

impl SystemResources {
    pub fn detect() -> Self {
        let mut sys = System::new_with_specifics(
            RefreshKind::new().with_memory(MemoryRefreshKind::everything()),
        );
        sys.refresh_memory();

        let cpu_count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);

        Self {
            total_memory_bytes: sys.total_memory(),
            available_memory_bytes: sys.available_memory(),
            cpu_count,
        }
    }
}

/// Recognized kernel configuration options. Deserializable from JSON/any
/// serde format; `Default` is the adaptive profile derived from
/// `SystemResources::detect()`, not a fixed constant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default = "KernelConfig::conservative")]
pub struct KernelConfig {
    /// Size threshold (bytes) to trigger a `ToggleQueue` transfer.
    pub buffer_page_size: usize,
    /// Max substring length indexed per token; 0 = unlimited.
    pub max_search_substring_length: usize,
    /// Whether `CorpusChunk::insert` returns non-empty artifact
    /// collections. When `false`, corpus indexing is a no-op.
    pub enable_search_cache: bool,
    /// Streaming manifest chunk read size (bytes).
    pub disk_read_buffer_size: usize,
    /// `SearchIndexer` worker thread count.
    pub indexer_threads: usize,
    /// Manifest byte length above which `Manifest::load` uses the
    /// streaming strategy instead of eagerly parsing into a heap map.
    pub manifest_streaming_threshold: usize,
}

impl KernelConfig {
    /// Conservative defaults suitable for tests and unknown environments,
    /// independent of the host machine.
    pub fn conservative() -> Self {
        Self {
            buffer_page_size: 10 * MB,
            max_search_substring_length: 0,
            enable_search_cache: true,
            disk_read_buffer_size: 64 * 1024,
            indexer_threads: 3,
            manifest_streaming_threshold: 32 * MB,
        }
    }

    /// Derive a configuration adapted to `res`.
    ///
    /// Heuristics:
    /// - `buffer_page_size`: `clamp(available * 0.02, 10 MB, 100 MB)`.
    /// - `indexer_threads`: `max(3, ceil(0.5 * cores))`.
    /// - `manifest_streaming_threshold`: 32 MiB below 4 GB RAM, else 64 MiB.
    pub fn from_resources(res: &SystemResources) -> Self {
        let total_gb = res.total_memory_bytes as f64 / GB as f64;

        let raw_bytes = (res.available_memory_bytes as f64 * 0.02) as usize;
        let buffer_page_size = raw_bytes.clamp(10 * MB, 100 * MB);

        let indexer_threads = (res.cpu_count.div_ceil(2)).max(3);

        let manifest_streaming_threshold = if total_gb < 4.0 { 32 * MB } else { 64 * MB };

        Self {
            buffer_page_size,
            manifest_streaming_threshold,
            indexer_threads,
            ..Self::conservative()
        }
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self::from_resources(&SystemResources::detect())
    }
}
