//! # Transport Multiplexer
//!
//! Keeps listeners fed from two transports with different delivery
//! guarantees:
//!
//! - one shared polling channel (server-sent events) carrying named events
//!   for `images`, `tracks`, `projects` and `comments`
//! - one push channel per resource (`comments`, `view_count`) backed by a
//!   change feed; each change signal triggers a full refetch whose result is
//!   what listeners receive
//!
//! Channels reconnect under a bounded [`ReconnectPolicy`], are shared by all
//! listeners of the resources routed to them, and close once the last of
//! those listeners unsubscribes.
//!
//! ## Usage
//!
//! ```ignore
//! let realtime = RealtimeClient::from_config(&config, api, events);
//! let subscription = realtime.subscribe(ResourceName::Tracks, |payload| {
//!     println!("tracks changed: {payload}");
//! });
//! // ...
//! drop(subscription);
//! realtime.disconnect();
//! ```
//!
//! [`ReconnectPolicy`]: core_runtime::config::ReconnectPolicy

pub mod channel;
pub mod client;
pub mod error;

pub use channel::ChannelKey;
pub use client::{Listener, RealtimeClient, RealtimeClientBuilder, Subscription};
pub use error::{RealtimeError, Result};
