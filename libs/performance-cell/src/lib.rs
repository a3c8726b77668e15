// =====================================================================================
// PERFORMANCE CELL - CACHE-ASIDE READ PATH & CACHE STATISTICS
// =====================================================================================

pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use models::*;
pub use router::create_performance_router;
pub use services::{CacheKey, CacheService, CacheStore, InMemoryCacheStore, RedisCacheStore};
