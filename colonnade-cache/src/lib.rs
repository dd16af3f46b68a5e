pub mod handles;
pub mod manager;
pub mod temp;

pub use handles::{FileHandle, HandlePool};
pub use manager::{CacheId, CacheManager, CacheRead};
pub use temp::TempRegistry;
