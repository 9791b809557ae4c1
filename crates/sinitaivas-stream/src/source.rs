// ABOUTME: The event source seam and its WebSocket implementation against a relay.
// ABOUTME: Subscriptions yield a stream of parsed events until the relay closes or errors.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use sinitaivas_core::Commit;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::frame;

/// XRPC method serving the repository event stream.
pub const SUBSCRIBE_REPOS: &str = "com.atproto.sync.subscribeRepos";

/// Events buffered between the socket reader and the consumer.
const EVENT_BUFFER: usize = 256;

/// One event delivered by a source.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A repository commit.
    Commit(Commit),
    /// Any other message kind (identity, account, handle, info, ...).
    Other { kind: String, sequence: Option<u64> },
    /// A frame that could not be parsed into a known event.
    Malformed { reason: String },
}

/// Errors surfaced by an event source. All of them end the current
/// subscription; the consumer decides whether to reconnect.
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    #[error("failed to connect: {0}")]
    Connect(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("relay reported {error}: {}", .message.as_deref().unwrap_or("no message"))]
    Remote {
        error: String,
        message: Option<String>,
    },
}

pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, SourceError>> + Send>>;

/// A subscribable, cursor-addressable stream of repository events.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Open a subscription. `cursor` asks the source to replay events
    /// strictly after that sequence; `None` starts at the live tip.
    async fn subscribe(&self, cursor: Option<u64>) -> Result<EventStream, SourceError>;
}

/// Event source backed by a relay's `subscribeRepos` WebSocket endpoint.
#[derive(Debug, Clone)]
pub struct WebSocketSource {
    base_url: String,
    idle_timeout: Duration,
}

impl WebSocketSource {
    /// `base_url` is the relay's XRPC root, e.g. `wss://bsky.network/xrpc`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            idle_timeout: Duration::from_secs(60),
        }
    }

    /// End the subscription with a transport error when no frame arrives
    /// within `idle_timeout`.
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn subscribe_url(&self, cursor: Option<u64>) -> String {
        let base = self.base_url.trim_end_matches('/');
        match cursor {
            Some(cursor) => format!("{}/{}?cursor={}", base, SUBSCRIBE_REPOS, cursor),
            None => format!("{}/{}", base, SUBSCRIBE_REPOS),
        }
    }
}

#[async_trait]
impl EventSource for WebSocketSource {
    async fn subscribe(&self, cursor: Option<u64>) -> Result<EventStream, SourceError> {
        let url = self.subscribe_url(cursor);
        let (socket, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| SourceError::Connect(e.to_string()))?;
        tracing::info!(url = %url, "subscribed to relay");

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        tokio::spawn(read_frames(socket, tx, self.idle_timeout));
        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

/// Forward parsed frames from the socket until it closes, errors, or the
/// receiving side is dropped.
async fn read_frames(
    mut socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
    tx: mpsc::Sender<Result<StreamEvent, SourceError>>,
    idle_timeout: Duration,
) {
    loop {
        let message = match tokio::time::timeout(idle_timeout, socket.next()).await {
            Ok(Some(message)) => message,
            Ok(None) => break,
            Err(_) => {
                let _ = tx
                    .send(Err(SourceError::Transport(format!(
                        "no frame received in {:?}",
                        idle_timeout
                    ))))
                    .await;
                break;
            }
        };

        let item = match message {
            Ok(Message::Binary(data)) => frame::parse_frame(&data),
            Ok(Message::Text(text)) => Ok(StreamEvent::Malformed {
                reason: format!("unexpected text frame of {} bytes", text.len()),
            }),
            Ok(Message::Close(close)) => {
                tracing::info!(frame = ?close, "relay closed the subscription");
                break;
            }
            Ok(_) => continue,
            Err(e) => Err(SourceError::Transport(e.to_string())),
        };

        let terminal = item.is_err();
        if tx.send(item).await.is_err() {
            tracing::debug!("event receiver dropped, closing socket");
            break;
        }
        if terminal {
            break;
        }
    }
}
