pub mod backend;
pub mod namespaced;

pub use backend::{CacheBackend, CacheError, MemoryBackend, RedisBackend};
pub use namespaced::{compose, NamespacedCache};
