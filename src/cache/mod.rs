pub mod data_url_cache;
pub mod store;

pub use data_url_cache::DataUrlCache;
pub use store::{CacheKey, CacheStore, CacheStoreExt, FileCache};
