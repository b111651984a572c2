//! Transport channels and their inbound signal streams
//!
//! Both transports are normalized into one [`Signal`] stream so a single
//! supervisor loop drives reconnection for every channel.

use bridge_traits::realtime::{ChangeSignal, ChangeStream, ChannelEvent, ChannelStream};
use core_api::{ApiClient, ResourceName};
use futures::stream::{BoxStream, StreamExt};
use serde_json::Value;
use std::fmt;
use tracing::{debug, warn};

/// Identity of a physical channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKey {
    /// The one shared polling connection
    Polling,
    /// Dedicated push subscription for one resource
    Push(ResourceName),
}

impl ChannelKey {
    pub fn name(&self) -> &'static str {
        match self {
            ChannelKey::Polling => "polling",
            ChannelKey::Push(resource) => resource.as_str(),
        }
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Normalized inbound item
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Signal {
    Opened,
    Deliver {
        resource: ResourceName,
        payload: Value,
    },
    /// Nothing to deliver (unknown event, unreadable payload, failed refetch)
    Ignored,
    Failed(String),
}

pub(crate) type SignalStream = BoxStream<'static, Signal>;

/// Route named polling events to resources by event name.
pub(crate) fn polling_signals(events: ChannelStream) -> SignalStream {
    events
        .map(|event| match event {
            ChannelEvent::Open => Signal::Opened,
            ChannelEvent::Error(message) => Signal::Failed(message),
            ChannelEvent::Message { event, data } => {
                let Ok(resource) = event.parse::<ResourceName>() else {
                    debug!(event = %event, "Ignoring unrouted event");
                    return Signal::Ignored;
                };
                match serde_json::from_str(&data) {
                    Ok(payload) => Signal::Deliver { resource, payload },
                    Err(e) => {
                        warn!(resource = %resource, error = %e, "Dropping event with unreadable payload");
                        Signal::Ignored
                    }
                }
            }
        })
        .boxed()
}

/// Turn payload-less change signals into fresh full-resource fetches.
///
/// Fetches run one at a time, so deliveries keep arrival order.
pub(crate) fn push_signals(
    resource: ResourceName,
    changes: ChangeStream,
    api: ApiClient,
) -> SignalStream {
    changes
        .then(move |signal| {
            let api = api.clone();
            async move {
                match signal {
                    ChangeSignal::Subscribed => Signal::Opened,
                    ChangeSignal::Error(message) => Signal::Failed(message),
                    ChangeSignal::Changed => {
                        let response = api.fetch_resource(resource).await;
                        match response.error {
                            None => Signal::Deliver {
                                resource,
                                payload: response.data,
                            },
                            Some(error) => {
                                warn!(resource = %resource, error = %error, "Fetch after change notification failed");
                                Signal::Ignored
                            }
                        }
                    }
                }
            }
        })
        .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingHttp {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl HttpClient for CountingHttp {
        async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            assert!(request.url.ends_with("/api/comments"));
            Ok(HttpResponse::new(
                200,
                format!(r#"[{{"id":"{}"}}]"#, n),
            ))
        }
    }

    fn message(event: &str, data: &str) -> ChannelEvent {
        ChannelEvent::Message {
            event: event.to_string(),
            data: data.to_string(),
        }
    }

    #[tokio::test]
    async fn test_polling_routes_by_event_name() {
        let events = futures::stream::iter(vec![
            ChannelEvent::Open,
            message("tracks", r#"[{"id":"1"}]"#),
            message("heartbeat", "{}"),
            message("images", "not json"),
            message("comments", "[]"),
            ChannelEvent::Error("reset by peer".to_string()),
        ])
        .boxed();

        let signals: Vec<_> = polling_signals(events).collect().await;

        assert_eq!(
            signals,
            vec![
                Signal::Opened,
                Signal::Deliver {
                    resource: ResourceName::Tracks,
                    payload: json!([{"id": "1"}])
                },
                Signal::Ignored,
                Signal::Ignored,
                Signal::Deliver {
                    resource: ResourceName::Comments,
                    payload: json!([])
                },
                Signal::Failed("reset by peer".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_push_fetches_on_each_change() {
        let http = Arc::new(CountingHttp {
            calls: AtomicUsize::new(0),
        });
        let api = ApiClient::new(http.clone(), "http://localhost:3000");
        let changes = futures::stream::iter(vec![
            ChangeSignal::Subscribed,
            ChangeSignal::Changed,
            ChangeSignal::Changed,
        ])
        .boxed();

        let signals: Vec<_> = push_signals(ResourceName::Comments, changes, api)
            .collect()
            .await;

        assert_eq!(http.calls.load(Ordering::SeqCst), 2);
        assert_eq!(signals[0], Signal::Opened);
        assert_eq!(
            signals[2],
            Signal::Deliver {
                resource: ResourceName::Comments,
                payload: json!([{"id": "1"}])
            }
        );
    }

    #[test]
    fn test_channel_names() {
        assert_eq!(ChannelKey::Polling.to_string(), "polling");
        assert_eq!(ChannelKey::Push(ResourceName::ViewCount).to_string(), "view_count");
    }
}
