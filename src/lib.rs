pub mod cache;
pub mod config;
pub mod error;
pub mod handle;
pub mod manager;
pub mod name;

pub use cache::{
    build_cache, CacheStats, FilesCache, Flavor, LruCache, NullCache, PartitionRegistry,
    ReclaimableCache, UnboundedCache,
};

pub use config::get_config_path;
pub use config::load_config;
pub use config::load_config_from;
pub use config::save_config;
pub use config::save_config_to;
pub use config::CacheConfig;
pub use config::CachePolicy;
pub use config::CacheStrategy;
pub use config::Config;

pub use error::{CacheError, Result};

pub use handle::{FileHandle, HandleState, ReclaimHook};

pub use manager::HandleManager;

pub use name::{CacheKey, FileName, FileSystemId};
