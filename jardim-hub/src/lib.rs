pub mod config;
pub mod hub;
pub mod notify;
pub mod reconciler;
pub mod state;
pub mod storage;

pub use config::{Config, LinkConfig, MockPotConfig, ProvisioningConfig, StorageConfig};
pub use hub::{Hub, HubError};
pub use notify::{LogNotifier, Notifier};
pub use reconciler::{Rejected, compute_mood, on_mood_changed, on_telemetry};
pub use state::{HubState, MessageStats};
pub use storage::file::FileStore;
pub use storage::memory::MemoryStore;
pub use storage::repository::{NotificationLog, PotRepository, RepositoryError};
pub use storage::{KeyValueStore, StoreError};
