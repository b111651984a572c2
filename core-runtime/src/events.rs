//! # Event Bus System
//!
//! Broadcast channel for observing the synchronization core from the outside
//! (status indicators, diagnostics, tests) using `tokio::sync::broadcast`.
//!
//! ## Overview
//!
//! - **Event Types**: [`CoreEvent`] wraps [`RealtimeEvent`] (channel lifecycle)
//!   and [`CacheEvent`] (local cache mutations)
//! - **EventBus**: Central broadcast channel for publishing events
//! - **EventStream**: Wrapper for consuming events with filtering
//!
//! Publishing never blocks and never fails the publisher: with no subscriber
//! the event is simply dropped.
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, ConnectionState, EventBus, RealtimeEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let event_bus = EventBus::new(100);
//! let mut stream = event_bus.subscribe();
//!
//! event_bus.emit(CoreEvent::Realtime(RealtimeEvent::ChannelStateChanged {
//!     channel: "polling".to_string(),
//!     state: ConnectionState::Open,
//!     attempt: 0,
//! })).ok();
//!
//! let event = stream.recv().await.unwrap();
//! assert!(matches!(event, CoreEvent::Realtime(_)));
//! # }
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: Subscriber was too slow and missed `n` events.
//!   Non-fatal; the subscriber continues with newer events.
//! - **`RecvError::Closed`**: All senders have been dropped (shutdown).

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum published through the event bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Transport channel lifecycle
    Realtime(RealtimeEvent),
    /// Local cache mutations
    Cache(CacheEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Realtime(e) => e.description(),
            CoreEvent::Cache(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Realtime(RealtimeEvent::ReconnectExhausted { .. }) => EventSeverity::Error,
            CoreEvent::Realtime(RealtimeEvent::ChannelStateChanged {
                state: ConnectionState::Error,
                ..
            }) => EventSeverity::Warning,
            CoreEvent::Realtime(RealtimeEvent::ChannelStateChanged {
                state: ConnectionState::Open,
                ..
            }) => EventSeverity::Info,
            CoreEvent::Cache(CacheEvent::Imported { .. }) | CoreEvent::Cache(CacheEvent::Reset) => {
                EventSeverity::Info
            }
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Realtime Events
// ============================================================================

/// Lifecycle state of a transport channel.
///
/// ```text
/// Disconnected → Connecting → Open → Error → Reconnecting → Connecting
///                                      ↓
///                                    Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Error,
    Reconnecting,
    /// Retries exhausted or explicitly disconnected; no automatic recovery
    Closed,
}

impl ConnectionState {
    /// Whether the channel may still deliver events without outside help
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting
                | ConnectionState::Open
                | ConnectionState::Error
                | ConnectionState::Reconnecting
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Error => "error",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Events emitted by the transport multiplexer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum RealtimeEvent {
    /// A channel moved to a new state.
    ChannelStateChanged {
        /// `polling` or the push-backed resource name.
        channel: String,
        state: ConnectionState,
        /// Reconnect attempts made since the last successful open.
        attempt: u32,
    },
    /// A channel gave up after the configured number of attempts.
    ReconnectExhausted { channel: String, attempts: u32 },
}

impl RealtimeEvent {
    fn description(&self) -> &str {
        match self {
            RealtimeEvent::ChannelStateChanged { .. } => "Channel state changed",
            RealtimeEvent::ReconnectExhausted { .. } => "Channel reconnect attempts exhausted",
        }
    }
}

// ============================================================================
// Cache Events
// ============================================================================

/// Events emitted by the local cache store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum CacheEvent {
    /// A collection was rewritten.
    CollectionUpdated { collection: String, len: usize },
    /// The whole store was replaced from an imported snapshot.
    Imported { collections: usize },
    /// The store was reset to the bundled defaults.
    Reset,
}

impl CacheEvent {
    fn description(&self) -> &str {
        match self {
            CacheEvent::CollectionUpdated { .. } => "Cache collection updated",
            CacheEvent::Imported { .. } => "Cache imported",
            CacheEvent::Reset => "Cache reset",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for publishing and subscribing to core events.
///
/// Cloning is cheap; all clones share one channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified buffer size.
    ///
    /// A subscriber that falls behind by more than `capacity` events receives
    /// `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an error
    /// if there are none. Callers that only observe should ignore the error.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscription to the event bus.
    ///
    /// Only events published after this call are received.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    /// Returns the current number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// Event stream with optional filtering.
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, EventStream};
///
/// let event_bus = EventBus::new(100);
/// let realtime_only = EventStream::new(event_bus.subscribe())
///     .filter(|event| matches!(event, CoreEvent::Realtime(_)));
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    /// Creates a new event stream from a receiver.
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only events that match the predicate will be returned by `recv()`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    /// Receives the next event that passes the filter (if any).
    ///
    /// # Errors
    ///
    /// Returns `RecvError::Lagged(n)` if the subscriber fell behind by `n` events.
    /// Returns `RecvError::Closed` if all senders have been dropped.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;

            let Some(filter) = &self.filter else {
                return Ok(event);
            };

            if filter(&event) {
                return Ok(event);
            }
        }
    }

    /// Attempts to receive an event without blocking.
    ///
    /// Returns `None` if no events are currently available.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    let Some(filter) = &self.filter else {
                        return Some(Ok(event));
                    };

                    if filter(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_event(channel: &str, state: ConnectionState) -> CoreEvent {
        CoreEvent::Realtime(RealtimeEvent::ChannelStateChanged {
            channel: channel.to_string(),
            state,
            attempt: 0,
        })
    }

    #[tokio::test]
    async fn test_event_bus_creation() {
        let bus = EventBus::new(10);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_event_emission_no_subscribers() {
        let bus = EventBus::new(10);
        assert!(bus.emit(state_event("polling", ConnectionState::Open)).is_err());
    }

    #[tokio::test]
    async fn test_multiple_subscribers_receive_same_event() {
        let bus = EventBus::new(10);
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        let event = state_event("polling", ConnectionState::Connecting);
        assert_eq!(bus.emit(event.clone()).unwrap(), 2);

        assert_eq!(first.recv().await.unwrap(), event);
        assert_eq!(second.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn test_event_stream_with_filter() {
        let bus = EventBus::new(10);
        let mut stream = EventStream::new(bus.subscribe())
            .filter(|event| matches!(event, CoreEvent::Cache(_)));

        bus.emit(state_event("polling", ConnectionState::Open)).unwrap();
        bus.emit(CoreEvent::Cache(CacheEvent::Reset)).unwrap();

        assert_eq!(stream.recv().await.unwrap(), CoreEvent::Cache(CacheEvent::Reset));
    }

    #[tokio::test]
    async fn test_lagged_subscriber() {
        let bus = EventBus::new(2);
        let mut receiver = bus.subscribe();

        for _ in 0..5 {
            bus.emit(CoreEvent::Cache(CacheEvent::Reset)).unwrap();
        }

        assert!(matches!(receiver.recv().await, Err(RecvError::Lagged(_))));
    }

    #[test]
    fn test_event_severity() {
        assert_eq!(
            CoreEvent::Realtime(RealtimeEvent::ReconnectExhausted {
                channel: "polling".to_string(),
                attempts: 5,
            })
            .severity(),
            EventSeverity::Error
        );
        assert_eq!(
            state_event("comments", ConnectionState::Error).severity(),
            EventSeverity::Warning
        );
        assert_eq!(
            state_event("comments", ConnectionState::Connecting).severity(),
            EventSeverity::Debug
        );
    }

    #[test]
    fn test_connection_state_liveness() {
        assert!(ConnectionState::Reconnecting.is_live());
        assert!(!ConnectionState::Closed.is_live());
        assert!(!ConnectionState::Disconnected.is_live());
        assert_eq!(ConnectionState::Reconnecting.to_string(), "reconnecting");
    }

    #[test]
    fn test_event_serialization() {
        let event = state_event("polling", ConnectionState::Open);
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"Realtime\""));
        assert!(json.contains("\"state\":\"open\""));

        let back: CoreEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[tokio::test]
    async fn test_try_recv_empty() {
        let bus = EventBus::new(10);
        let mut stream = EventStream::new(bus.subscribe());
        assert!(stream.try_recv().is_none());
    }
}
