mod disk;
mod memory;

pub use disk::{DiskCache, DiskPayload, SCHEMA_VERSION};
pub use memory::{global_memory_cache, CacheStats, MemEntry, MemoryCache};
