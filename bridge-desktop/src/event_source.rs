//! Server-Sent Events transport using a streaming Reqwest response

use async_trait::async_trait;
use bridge_traits::{
    error::Result,
    realtime::{ChannelEvent, ChannelStream, EventSourceTransport},
};
use bytes::Bytes;
use futures_util::stream::{self, BoxStream, StreamExt};
use reqwest::Client;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_EVENT_NAME: &str = "message";

/// Incremental `text/event-stream` parser.
///
/// Bytes may arrive split at any boundary; complete events are returned as
/// soon as their terminating blank line has been seen.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and collect the events it completes.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<ChannelEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);
            if let Some(event) = self.process_line(&line) {
                events.push(event);
            }
        }
        events
    }

    fn process_line(&mut self, line: &str) -> Option<ChannelEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            // id and retry are not used: reconnection is owned by the core
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<ChannelEvent> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(ChannelEvent::Message {
            event: event.unwrap_or_else(|| DEFAULT_EVENT_NAME.to_string()),
            data,
        })
    }
}

enum StreamState {
    Connecting {
        client: Client,
        url: String,
    },
    Streaming {
        body: BoxStream<'static, reqwest::Result<Bytes>>,
        parser: SseParser,
        pending: VecDeque<ChannelEvent>,
    },
    Done,
}

async fn next_event(mut state: StreamState) -> Option<(ChannelEvent, StreamState)> {
    loop {
        match state {
            StreamState::Connecting { client, url } => {
                let response = client
                    .get(&url)
                    .header("Accept", "text/event-stream")
                    .header("Cache-Control", "no-cache")
                    .send()
                    .await;

                return match response {
                    Ok(response) if response.status().is_success() => {
                        debug!(url = %url, "Event stream opened");
                        Some((
                            ChannelEvent::Open,
                            StreamState::Streaming {
                                body: response.bytes_stream().boxed(),
                                parser: SseParser::new(),
                                pending: VecDeque::new(),
                            },
                        ))
                    }
                    Ok(response) => Some((
                        ChannelEvent::Error(format!("HTTP {}", response.status())),
                        StreamState::Done,
                    )),
                    Err(e) => {
                        warn!(error = %e, url = %url, "Event stream connection failed");
                        Some((ChannelEvent::Error(e.to_string()), StreamState::Done))
                    }
                };
            }
            StreamState::Streaming {
                mut body,
                mut parser,
                mut pending,
            } => {
                if let Some(event) = pending.pop_front() {
                    return Some((
                        event,
                        StreamState::Streaming {
                            body,
                            parser,
                            pending,
                        },
                    ));
                }

                match body.next().await {
                    Some(Ok(chunk)) => {
                        pending.extend(parser.feed(&chunk));
                        state = StreamState::Streaming {
                            body,
                            parser,
                            pending,
                        };
                    }
                    Some(Err(e)) => {
                        return Some((ChannelEvent::Error(e.to_string()), StreamState::Done))
                    }
                    None => {
                        return Some((
                            ChannelEvent::Error("Event stream closed by server".to_string()),
                            StreamState::Done,
                        ))
                    }
                }
            }
            StreamState::Done => return None,
        }
    }
}

/// Reqwest-based server-sent events transport
///
/// The underlying client has no overall request timeout, since the response
/// body is expected to stay open indefinitely. Dropping the returned stream
/// drops the response and closes the connection.
pub struct ReqwestEventSource {
    client: Client,
}

impl ReqwestEventSource {
    pub fn new() -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .user_agent(concat!("folio-sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Falling back to default reqwest client");
                Client::new()
            });
        Self { client }
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

impl Default for ReqwestEventSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventSourceTransport for ReqwestEventSource {
    async fn open(&self, url: &str) -> Result<ChannelStream> {
        let state = StreamState::Connecting {
            client: self.client.clone(),
            url: url.to_string(),
        };
        Ok(stream::unfold(state, next_event).boxed())
    }
}
