use jardim_core::{Notification, NotificationId, Pot, PotId};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::storage::{KeyValueStore, NOTIFICATIONS_KEY, POTS_KEY, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("pot {0} already exists")]
    DuplicateId(PotId),
    #[error("unknown pot {0}")]
    UnknownPot(PotId),
    #[error("unknown notification {0}")]
    UnknownNotification(NotificationId),
}

async fn load_list<S, T>(store: &S, key: &str) -> Result<Vec<T>, RepositoryError>
where
    S: KeyValueStore,
    T: DeserializeOwned,
{
    match store.get(key).await? {
        Some(raw) => Ok(serde_json::from_str(&raw).map_err(StoreError::from)?),
        None => Ok(Vec::new()),
    }
}

async fn save_list<S, T>(store: &S, key: &str, items: &[T]) -> Result<(), RepositoryError>
where
    S: KeyValueStore,
    T: Serialize,
{
    let raw = serde_json::to_string(items).map_err(StoreError::from)?;
    store.set(key, raw).await?;
    Ok(())
}

/// The ordered pot collection.
#[derive(Clone)]
pub struct PotRepository<S> {
    store: S,
}

impl<S: KeyValueStore> PotRepository<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// All pots in insertion order.
    pub async fn list(&self) -> Result<Vec<Pot>, RepositoryError> {
        load_list(&self.store, POTS_KEY).await
    }

    pub async fn get(&self, id: PotId) -> Result<Option<Pot>, RepositoryError> {
        Ok(self.list().await?.into_iter().find(|p| p.id == id))
    }

    /// Append `pot`. Ids must be unique across the collection.
    pub async fn insert(&self, pot: Pot) -> Result<(), RepositoryError> {
        let mut pots = self.list().await?;
        if pots.iter().any(|p| p.id == pot.id) {
            return Err(RepositoryError::DuplicateId(pot.id));
        }

        debug!(pot_id = %pot.id, "Storing pot");
        pots.push(pot);
        save_list(&self.store, POTS_KEY, &pots).await
    }

    /// Replace the stored pot with the same id, keeping its position.
    pub async fn update(&self, pot: Pot) -> Result<(), RepositoryError> {
        let mut pots = self.list().await?;
        let slot = pots
            .iter_mut()
            .find(|p| p.id == pot.id)
            .ok_or(RepositoryError::UnknownPot(pot.id))?;

        *slot = pot;
        save_list(&self.store, POTS_KEY, &pots).await
    }

    pub async fn remove(&self, id: PotId) -> Result<Pot, RepositoryError> {
        let mut pots = self.list().await?;
        let index = pots
            .iter()
            .position(|p| p.id == id)
            .ok_or(RepositoryError::UnknownPot(id))?;

        let removed = pots.remove(index);
        save_list(&self.store, POTS_KEY, &pots).await?;
        Ok(removed)
    }
}

/// Mood notifications, newest first.
#[derive(Clone)]
pub struct NotificationLog<S> {
    store: S,
}

impl<S: KeyValueStore> NotificationLog<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub async fn list(&self) -> Result<Vec<Notification>, RepositoryError> {
        load_list(&self.store, NOTIFICATIONS_KEY).await
    }

    pub async fn push(&self, notification: Notification) -> Result<(), RepositoryError> {
        let mut notifications = self.list().await?;
        notifications.insert(0, notification);
        save_list(&self.store, NOTIFICATIONS_KEY, &notifications).await
    }

    pub async fn mark_read(&self, id: NotificationId) -> Result<(), RepositoryError> {
        let mut notifications = self.list().await?;
        let notification = notifications
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or(RepositoryError::UnknownNotification(id))?;

        notification.read = true;
        save_list(&self.store, NOTIFICATIONS_KEY, &notifications).await
    }

    pub async fn mark_all_read(&self) -> Result<usize, RepositoryError> {
        let mut notifications = self.list().await?;
        let mut changed = 0;
        for notification in notifications.iter_mut().filter(|n| !n.read) {
            notification.read = true;
            changed += 1;
        }

        if changed > 0 {
            save_list(&self.store, NOTIFICATIONS_KEY, &notifications).await?;
        }
        Ok(changed)
    }

    pub async fn unread_count(&self) -> Result<usize, RepositoryError> {
        Ok(self.list().await?.iter().filter(|n| !n.read).count())
    }

    pub async fn clear(&self) -> Result<(), RepositoryError> {
        self.store.remove(NOTIFICATIONS_KEY).await?;
        Ok(())
    }
}
