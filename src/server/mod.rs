mod app;
mod middleware;
mod state;

pub use app::{create_app, prepare_storage};
pub use middleware::{cors_layer, trusted_host};
pub use state::AppState;
