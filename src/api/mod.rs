//! API layer - HTTP endpoint handlers organized by concern.

mod fanout;
mod groups;
mod health;
mod metrics;
mod routes;

pub use fanout::{broadcast_to_group, send_to_user, DeliveryResponse, FanoutRequest};
pub use groups::{group_connections, GroupConnectionsResponse};
pub use health::{health, stats, system_info};
pub use metrics::prometheus_metrics;
pub use routes::{api_routes, not_found};
