//! # Local Cache Store
//!
//! Persists the `images`, `tracks` and `projects` collections to durable
//! client storage so consumers can paint before the network answers.
//!
//! ## Overview
//!
//! - Reads degrade: missing or corrupt data yields the bundled defaults
//!   (`images` and `projects`) or an empty list (`tracks`)
//! - Writes are serialized; saving one collection rewrites its siblings
//!   verbatim
//! - Ids are unique per collection, even for adds within one millisecond
//! - Export/import move the whole store as one JSON document; a malformed
//!   import changes nothing
//!
//! ## Usage
//!
//! ```ignore
//! let cache = CacheStore::new(storage, clock, "portfolio_data");
//! let track = cache.tracks().add(&json!({"title": "Night Drive"})).await?;
//! cache.tracks().update(&track.id, &json!({"artist": "Kai"})).await?;
//! ```

pub mod error;
pub mod store;

pub use error::{CacheError, Result};
pub use store::{CacheSnapshot, CacheStore, Collection, CollectionHandle};
