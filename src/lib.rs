//! Artifact relay: distributes newly produced artifacts to many consumers
//! over a sequenced change feed, a best-effort WebSocket push and an
//! idempotent pull channel, with the consumer-side connection manager.

pub mod artifact;
pub mod config;
pub mod consumer;
pub mod errors;
pub mod logging;
pub mod metrics;
pub mod protocol;
pub mod realtime;
pub mod relay;
pub mod sanitize;
pub mod server;
pub mod store;

pub use artifact::Artifact;
pub use config::RelayConfig;
pub use consumer::{ConsumerClient, ConsumerConfig, ConsumerEvent, ConsumerHandle, DeliveryChannel};
pub use errors::{RelayError, RelayResult};
pub use realtime::{ChangeLog, ChangeRecord, PushServer};
pub use relay::Relay;
pub use store::{ArtifactStore, MemoryStore, PostgresStore};
