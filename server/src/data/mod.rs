//! Data layer: cache, event log, and relational store

pub mod cache;
pub mod events;
pub mod sqlite;
pub mod types;

pub use cache::{CacheService, RateLimiter};
pub use events::EventLogService;
pub use sqlite::SqliteService;
