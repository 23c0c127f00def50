use std::sync::Arc;
use std::time::Instant;

use tokio::sync::broadcast;

use crate::config::Settings;
use crate::connection_manager::ConnectionManager;
use crate::database::DatabaseProbe;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub connection_manager: Arc<ConnectionManager>,
    /// `None` when no database is configured
    pub database: Option<Arc<dyn DatabaseProbe>>,
    /// Fires once when the process starts shutting down
    pub shutdown: broadcast::Sender<()>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(settings: Settings, database: Option<Arc<dyn DatabaseProbe>>) -> Self {
        let connection_manager = Arc::new(ConnectionManager::with_limits(
            settings.websocket.limits(),
        ));
        let (shutdown, _) = broadcast::channel(1);

        Self {
            settings: Arc::new(settings),
            connection_manager,
            database,
            shutdown,
            start_time: Instant::now(),
        }
    }
}
