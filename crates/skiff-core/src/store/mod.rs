//! Persistence primitives: sharded entity directories and the key/value cache.

mod cache;
mod entity;

pub use cache::{KeyValueCache, CACHE_DB_FILENAME};
pub use entity::{Entity, EntityError, EntityStore, Model};

pub(crate) use entity::write_atomic;
