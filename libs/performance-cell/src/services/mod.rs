pub mod cache;
pub mod keys;
pub mod store;

pub use cache::CacheService;
pub use keys::CacheKey;
pub use store::{CacheStore, InMemoryCacheStore, RedisCacheStore};
