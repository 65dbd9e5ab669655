//! HTTP API layer

pub mod extractors;
pub mod routes;
pub mod server;
pub mod types;

use std::sync::Arc;

pub use server::ApiServer;
pub use types::ApiError;

use crate::data::cache::CacheService;
use crate::data::events::EventLogService;
use crate::data::sqlite::SqliteService;
use crate::domain::chat::ChatEngine;

/// Shared state for all API routes
#[derive(Clone)]
pub struct ApiState {
    pub engine: Arc<ChatEngine>,
    pub database: Arc<SqliteService>,
    pub cache: Arc<CacheService>,
    pub events: Arc<EventLogService>,
}
