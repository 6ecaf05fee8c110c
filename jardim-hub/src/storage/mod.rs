pub mod file;
pub mod memory;
pub mod repository;

use std::sync::PoisonError;

use async_trait::async_trait;

/// Key under which the pot collection is stored.
pub const POTS_KEY: &str = "@smartplant_pots";

/// Key under which the notification log is stored.
pub const NOTIFICATIONS_KEY: &str = "@petplant_notifications";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid store contents: {0}")]
    Json(#[from] serde_json::Error),
    #[error("mutex poisoned: {0}")]
    MutexPoisoned(String),
}

impl<T> From<PoisonError<T>> for StoreError {
    fn from(err: PoisonError<T>) -> Self {
        StoreError::MutexPoisoned(err.to_string())
    }
}

/// Flat string key-value persistence.
///
/// Values are whole serialized collections; callers read, modify and write
/// them back in full.
#[async_trait]
pub trait KeyValueStore: Send + Sync + 'static {
    /// Fetch the value stored under `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Store `value` under `key`, replacing what was there.
    async fn set(&self, key: &str, value: String) -> Result<(), StoreError>;

    /// Delete `key`. Missing keys are not an error.
    async fn remove(&self, key: &str) -> Result<(), StoreError>;
}
