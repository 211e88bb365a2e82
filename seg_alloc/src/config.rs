use crate::size_classes::FitPolicy;
use memory_units::Bytes;

/// The default upper bound on a heap's size, fixed at build time through the
/// `SEG_ALLOC_MAX_HEAP_BYTES` environment variable (32 MiB when unset).
pub const DEFAULT_MAX_HEAP_BYTES: usize =
    include!(concat!(env!("OUT_DIR"), "/seg_alloc_max_heap_bytes.txt"));

/// The default minimum heap growth increment.
pub const DEFAULT_CHUNK_SIZE: Bytes = Bytes(4096);

/// Run-time allocator tuning.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Config {
    /// The heap grows by at least this many bytes at a time, so that a run of
    /// small allocations does not hit the heap source on every call. Zero
    /// grows by exactly what each request needs.
    pub chunk_size: Bytes,

    /// How a free block is picked within a size class.
    pub fit: FitPolicy,
}

impl Config {
    /// The default configuration: 4 KiB chunks and best fit.
    pub const fn new() -> Config {
        Config {
            chunk_size: DEFAULT_CHUNK_SIZE,
            fit: FitPolicy::BestFit,
        }
    }

    /// Set the minimum heap growth increment.
    pub const fn with_chunk_size(self, chunk_size: Bytes) -> Config {
        Config { chunk_size, ..self }
    }

    /// Set the fit policy.
    pub const fn with_fit(self, fit: FitPolicy) -> Config {
        Config { fit, ..self }
    }
}

impl Default for Config {
    fn default() -> Config {
        Config::new()
    }
}
