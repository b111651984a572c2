//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for native hosts
//! (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! This crate provides production-ready implementations of the bridge traits
//! using desktop-appropriate libraries:
//! - `HttpClient` using `reqwest`
//! - `EventSourceTransport` using a streaming `reqwest` response parsed as
//!   server-sent events
//! - `ChangeFeed` relayed over the same server-sent event transport
//! - `KeyValueStore` using an SQLite-backed key-value table, plus an
//!   in-memory store for ephemeral sessions
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{ReqwestEventSource, ReqwestHttpClient, SqliteKeyValueStore};
//!
//! #[tokio::main]
//! async fn main() {
//!     let http_client = ReqwestHttpClient::new();
//!     let event_source = ReqwestEventSource::new();
//!     let store = SqliteKeyValueStore::new(SqliteKeyValueStore::default_path()).await?;
//!
//!     // Use in core configuration
//! }
//! ```

mod change_feed;
mod event_source;
mod http;
mod store;

pub use change_feed::SseChangeFeed;
pub use event_source::{ReqwestEventSource, SseParser};
pub use http::ReqwestHttpClient;
pub use store::{MemoryKeyValueStore, SqliteKeyValueStore};
