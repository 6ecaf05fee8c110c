use async_trait::async_trait;
use jardim_core::Notification;
use tracing::info;

/// Where mood alerts are presented to the user.
#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    async fn notify(&self, notification: &Notification);
}

/// Notifier that writes alerts to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) {
        info!(
            id = %notification.id,
            mood = %notification.mood,
            title = %notification.title,
            body = %notification.body,
            "Plant notification"
        );
    }
}
