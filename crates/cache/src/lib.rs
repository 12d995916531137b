//! Two-tier, fail-open cache-aside service.
//!
//! A fast in-process tier (moka) backed by an optional shared Redis tier,
//! wrapped in a decorator that swallows cache infrastructure failures and
//! falls back to the caller's factory. Cache unavailability never surfaces
//! as a caller-visible failure.

pub mod error;
pub mod health;
pub mod key;
pub mod service;
pub mod store;

pub use error::{CacheError, CacheResult};
pub use health::CacheHealth;
pub use key::cache_key;
pub use service::CacheService;
pub use store::{CacheEntrySettings, RedisTier, SharedTier, TieredStore};
