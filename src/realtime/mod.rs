//! Producer-side realtime infrastructure.
//!
//! The sequenced per-consumer change log, the best-effort push fan-out,
//! heartbeat bookkeeping and the consumer-side dedup window.

pub mod broadcast;
pub mod change_log;
pub mod dedup;
pub mod heartbeat;

// Re-export main types for convenience
pub use broadcast::{BroadcastConfig, BroadcastReport, ConnectionId, OutboundFrame, PushServer, PushStatus};
pub use change_log::{
    ChangeBatch, ChangeKind, ChangeLog, ChangeLogConfig, ChangeLogStats, ChangeRecord, OverflowPolicy,
};
pub use dedup::SeenCache;
pub use heartbeat::{Heartbeat, HeartbeatMonitor};
