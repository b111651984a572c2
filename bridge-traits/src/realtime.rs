//! Realtime Transport Abstractions
//!
//! Two transports with different delivery guarantees feed the core:
//!
//! - [`EventSourceTransport`]: one long-lived connection over which the server
//!   streams named events, each with a JSON payload (server-sent events).
//! - [`ChangeFeed`]: a per-table database change feed. Signals carry no data;
//!   they only say "this table changed".
//!
//! Dropping a returned stream closes the connection or subscription.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::Result;

/// Event produced by a polling channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// Transport-level open: the server accepted the connection
    Open,
    /// A named event with its raw (JSON) data
    Message { event: String, data: String },
    /// Transport-level error or forced closure
    Error(String),
}

pub type ChannelStream = BoxStream<'static, ChannelEvent>;

/// Long-lived event stream transport
///
/// # Contract
///
/// - `open` returns as soon as the request is issued; the transport then
///   yields [`ChannelEvent::Open`] once the server accepts it.
/// - A stream that ends without an `Error` is treated as a forced closure.
/// - Dropping the stream must release the connection.
#[async_trait]
pub trait EventSourceTransport: Send + Sync {
    /// Open a channel to the given absolute URL
    async fn open(&self, url: &str) -> Result<ChannelStream>;
}

/// Signal produced by a change feed subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeSignal {
    /// The subscription is live
    Subscribed,
    /// Something changed in the watched table
    Changed,
    /// The subscription failed or was closed by the server
    Error(String),
}

pub type ChangeStream = BoxStream<'static, ChangeSignal>;

/// Database change feed
///
/// Each call to `subscribe` creates an independent subscription; dropping the
/// returned stream removes it.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Subscribe to changes on a table
    async fn subscribe(&self, table: &str) -> Result<ChangeStream>;
}
