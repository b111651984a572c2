//! Change feed relayed over a server-sent event stream
//!
//! The server publishes one named event per changed table on a dedicated
//! relay endpoint; payloads are ignored and only the event name matters.

use async_trait::async_trait;
use bridge_traits::{
    error::Result,
    realtime::{ChangeFeed, ChangeSignal, ChangeStream, ChannelEvent, EventSourceTransport},
};
use futures_util::{future, StreamExt};
use std::sync::Arc;
use tracing::debug;

/// `ChangeFeed` backed by an [`EventSourceTransport`]
///
/// Every `subscribe` opens its own connection, so each table keeps an
/// independent lifecycle.
pub struct SseChangeFeed {
    transport: Arc<dyn EventSourceTransport>,
    url: String,
}

impl SseChangeFeed {
    pub fn new(transport: Arc<dyn EventSourceTransport>, url: impl Into<String>) -> Self {
        Self {
            transport,
            url: url.into(),
        }
    }
}

#[async_trait]
impl ChangeFeed for SseChangeFeed {
    async fn subscribe(&self, table: &str) -> Result<ChangeStream> {
        let url = format!("{}?table={}", self.url, table);
        debug!(table, url = %url, "Subscribing to change relay");

        let table = table.to_string();
        let events = self.transport.open(&url).await?;
        let signals = events.filter_map(move |event| {
            let signal = match event {
                ChannelEvent::Open => Some(ChangeSignal::Subscribed),
                ChannelEvent::Message { event, .. } if event == table => {
                    Some(ChangeSignal::Changed)
                }
                ChannelEvent::Message { .. } => None,
                ChannelEvent::Error(message) => Some(ChangeSignal::Error(message)),
            };
            future::ready(signal)
        });

        Ok(signals.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::realtime::ChannelStream;
    use std::sync::Mutex;

    struct ScriptedTransport {
        events: Vec<ChannelEvent>,
        urls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl EventSourceTransport for ScriptedTransport {
        async fn open(&self, url: &str) -> Result<ChannelStream> {
            self.urls.lock().unwrap().push(url.to_string());
            Ok(futures::stream::iter(self.events.clone()).boxed())
        }
    }

    #[tokio::test]
    async fn test_only_matching_table_events_become_changes() {
        let transport = Arc::new(ScriptedTransport {
            events: vec![
                ChannelEvent::Open,
                ChannelEvent::Message {
                    event: "comments".to_string(),
                    data: "{}".to_string(),
                },
                ChannelEvent::Message {
                    event: "view_count".to_string(),
                    data: "{}".to_string(),
                },
                ChannelEvent::Error("closed".to_string()),
            ],
            urls: Mutex::new(Vec::new()),
        });
        let feed = SseChangeFeed::new(transport.clone(), "http://localhost/api/realtime/changes");

        let signals: Vec<_> = feed.subscribe("comments").await.unwrap().collect().await;

        assert_eq!(
            signals,
            vec![
                ChangeSignal::Subscribed,
                ChangeSignal::Changed,
                ChangeSignal::Error("closed".to_string()),
            ]
        );
        assert_eq!(
            transport.urls.lock().unwrap().as_slice(),
            ["http://localhost/api/realtime/changes?table=comments"]
        );
    }
}
