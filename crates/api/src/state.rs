use std::sync::Arc;

use entrypass_core::store::TicketStore;

use crate::config::ServerConfig;
use crate::sessions::SessionManager;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable: everything is behind `Arc` or is already `Clone`.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool (health checks).
    pub pool: entrypass_db::DbPool,
    pub config: Arc<ServerConfig>,
    /// Ticket and event collaborator used by the verification flow.
    pub store: Arc<dyn TicketStore>,
    /// Open verification sessions.
    pub sessions: Arc<SessionManager>,
}
