//! Embedded write-through cache tier.
//!
//! Each tenant owns one `redb` database file inside its cache directory.
//! Values are opaque byte blobs; typed access goes through
//! [`CacheStore::get_json`] and [`CacheStore::put_json`]. Keys are built
//! with [`CacheKey`] so every entry carries its keyspace and tenant.

pub mod keys;
pub mod store;

pub use keys::{CacheKey, Keyspace};
pub use store::CacheStore;
