pub mod paths;
pub mod persistence;
pub mod schema;

pub use paths::*;
pub use persistence::*;
pub use schema::*;

fn default_lru_capacity() -> usize {
    crate::cache::lru::DEFAULT_LRU_CAPACITY
}

fn default_soft_retain() -> usize {
    crate::cache::reclaim::DEFAULT_SOFT_RETAIN
}

fn default_reaper_poll_ms() -> u64 {
    1000
}
