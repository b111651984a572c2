//! # Host Bridge Traits
//!
//! Platform abstraction traits that must be implemented by each host platform.
//!
//! ## Overview
//!
//! This crate defines the contract between the synchronization core and the
//! platform-specific implementations. Each trait represents a capability the
//! core requires but that is implemented differently per host (native desktop
//! shell, browser, test harness).
//!
//! ## Traits
//!
//! ### Networking
//! - [`HttpClient`](http::HttpClient) - Async request/response calls against the API
//! - [`EventSourceTransport`](realtime::EventSourceTransport) - Long-lived polling
//!   channel streaming named events (server-sent events)
//! - [`ChangeFeed`](realtime::ChangeFeed) - Database change feed delivering
//!   payload-less change signals per table
//!
//! ### Storage
//! - [`KeyValueStore`](storage::KeyValueStore) - Durable client storage
//!   (localStorage on the web, SQLite on desktop)
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Closing channels
//!
//! Both realtime traits hand out `'static` streams. Dropping the stream is the
//! teardown: implementations must release the underlying connection or
//! subscription when the stream is dropped, so the core never needs a separate
//! `close` call and can never leave a dangling listener behind.
//!
//! ## Error Handling
//!
//! All bridge traits use the [`BridgeError`](error::BridgeError) type. Platform
//! implementations should convert platform-specific errors to `BridgeError` and
//! include context (URL, storage key) in the message.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` so a single instance can be shared
//! across async tasks behind an `Arc`.
//!
//! ## Examples
//!
//! ### Implementing HttpClient
//!
//! ```ignore
//! use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse};
//! use bridge_traits::error::Result;
//! use async_trait::async_trait;
//!
//! pub struct MyHttpClient {
//!     client: reqwest::Client,
//! }
//!
//! #[async_trait]
//! impl HttpClient for MyHttpClient {
//!     async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
//!         // Implementation
//!         todo!()
//!     }
//! }
//! ```

pub mod error;
pub mod http;
pub mod realtime;
pub mod storage;
pub mod time;

pub use error::BridgeError;

// Re-export commonly used types
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
pub use realtime::{
    ChangeFeed, ChangeSignal, ChangeStream, ChannelEvent, ChannelStream, EventSourceTransport,
};
pub use storage::KeyValueStore;
pub use time::{Clock, LogEntry, LogLevel, LoggerSink, SystemClock};
