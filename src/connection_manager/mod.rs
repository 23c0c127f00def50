//! Registry of live WebSocket connections and group/user fan-out.

mod guard;
mod registry;
mod stats;
mod types;

pub use guard::Registration;
pub use registry::ConnectionManager;
pub use stats::{
    BroadcastReport, ConnectionInfo, ConnectionStats, DeliveryFailure, FanoutStats,
    FanoutStatsSnapshot, GroupInfo,
};
pub use types::{
    ConnectionError, ConnectionHandle, ConnectionLimits, DuplicateUserPolicy, SendError, UserId,
};
