//! Optional database backing store.
//!
//! The real-time layer never touches the database; it is only probed for the
//! aggregate health report.

mod pool;

pub use pool::{DatabaseError, PostgresDatabase};

use async_trait::async_trait;

/// Liveness check for a database dependency
#[async_trait]
pub trait DatabaseProbe: Send + Sync {
    /// True if the database answered a trivial query
    async fn ping(&self) -> bool;

    /// Short backend name for reports
    fn backend(&self) -> &'static str;
}
