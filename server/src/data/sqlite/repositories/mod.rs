//! SQLite repositories
//!
//! Free functions over a `SqlitePool`, one module per aggregate.

pub mod chat;
pub mod credential;
pub mod message;
pub mod model;
pub mod owner;

#[cfg(test)]
pub(crate) mod testing {
    use sqlx::SqlitePool;

    use crate::data::sqlite::SqliteService;

    /// Fresh in-memory database with migrations applied
    pub async fn pool() -> SqlitePool {
        SqliteService::init_in_memory().await.unwrap().pool().clone()
    }
}
