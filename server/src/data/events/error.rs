//! Event log error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EventLogError {
    #[error("Event log configuration error: {0}")]
    Config(String),

    #[error("Event log connection error: {0}")]
    Connection(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Stream operation error: {0}")]
    Stream(String),

    #[error("Redis error: {0}")]
    Redis(#[from] deadpool_redis::redis::RedisError),

    #[error("Redis pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),
}
