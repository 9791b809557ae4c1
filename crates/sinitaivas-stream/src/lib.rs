// ABOUTME: Streaming layer: event sources, frame and CAR decoding, and the resilient consumer.
// ABOUTME: Connects the decode and storage crates to a live relay subscription.

pub mod car;
pub mod config;
pub mod consumer;
pub mod frame;
pub mod mode;
pub mod retry;
pub mod source;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use car::CarBlockDecoder;
pub use config::{ConfigError, DEFAULT_LOG_FILE, DEFAULT_RELAY_URL, StreamerConfig};
pub use consumer::{Consumer, ConsumerError, ConsumerState, ConsumerStats, Disposition};
pub use mode::{Mode, ModeError, start_position};
pub use retry::RetryPolicy;
pub use source::{EventSource, EventStream, SourceError, StreamEvent, WebSocketSource};
