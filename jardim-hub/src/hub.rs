use std::sync::Arc;

use jardim_bridge::{Bridge, Delivery, Message};
use jardim_core::{
    Actuator, DiscoveredDevice, Notification, NotificationId, Pot, PotDraft, PotId,
    ProvisioningResult, SwitchState, topics,
};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::notify::Notifier;
use crate::reconciler::{self, Rejected};
use crate::state::HubState;
use crate::storage::KeyValueStore;
use crate::storage::repository::{NotificationLog, PotRepository, RepositoryError};

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error("telemetry rejected: {0}")]
    Rejected(#[from] Rejected),
}

/// Ties the broker connection, the pot collection and mood alerts together.
pub struct Hub<S> {
    bridge: Arc<Bridge>,
    pots: PotRepository<S>,
    notifications: NotificationLog<S>,
    notifier: Arc<dyn Notifier>,
    state: HubState,
    /// Held across every read-modify-write of the stored collections.
    edits: Mutex<()>,
}

impl<S: KeyValueStore + Clone> Hub<S> {
    pub fn new(bridge: Arc<Bridge>, store: S, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            bridge,
            pots: PotRepository::new(store.clone()),
            notifications: NotificationLog::new(store),
            notifier,
            state: HubState::new(),
            edits: Mutex::new(()),
        }
    }

    pub fn bridge(&self) -> &Arc<Bridge> {
        &self.bridge
    }

    pub fn state(&self) -> &HubState {
        &self.state
    }

    /// Subscribe to telemetry and every known pot, and return the inbound feed.
    pub async fn start(&self, capacity: usize) -> Result<mpsc::Receiver<Message>, HubError> {
        let (_, rx) = self.bridge.channel("#", capacity);

        self.bridge.subscribe(topics::HUMIDITY).await;
        for pot in self.pots.list().await? {
            self.bridge.subscribe(&topics::pot_status(pot.id)).await;
        }
        Ok(rx)
    }

    /// Create a pot, optionally linked to a freshly provisioned device.
    #[instrument(skip_all, fields(name = %draft.name))]
    pub async fn add_pot(
        &self,
        draft: PotDraft,
        link: Option<(DiscoveredDevice, ProvisioningResult)>,
    ) -> Result<Pot, HubError> {
        let mut pot = Pot::from_draft(draft);
        if let Some((device, result)) = &link {
            pot.link_device(&device.device_id, result);
        }

        {
            let _edit = self.edits.lock().await;
            self.pots.insert(pot.clone()).await?;
        }
        info!(pot_id = %pot.id, linked = pot.has_device(), "Pot added");

        let delivery = self.bridge.subscribe(&topics::pot_status(pot.id)).await;
        debug!(pot_id = %pot.id, ?delivery, "Status topic requested");

        self.state.activate_if_idle(pot.id).await;
        Ok(pot)
    }

    pub async fn update_pot(&self, pot: Pot) -> Result<(), HubError> {
        let _edit = self.edits.lock().await;
        self.pots.update(pot).await?;
        Ok(())
    }

    pub async fn remove_pot(&self, id: PotId) -> Result<Pot, HubError> {
        let removed = {
            let _edit = self.edits.lock().await;
            self.pots.remove(id).await?
        };
        self.bridge.unsubscribe(&topics::pot_status(id)).await;
        self.state.deactivate(id).await;

        info!(pot_id = %id, "Pot removed");
        Ok(removed)
    }

    /// Point inbound telemetry at `id`.
    pub async fn select_pot(&self, id: PotId) -> Result<Pot, HubError> {
        let pot = self
            .pots
            .get(id)
            .await?
            .ok_or(RepositoryError::UnknownPot(id))?;

        self.state.set_active_pot(Some(id)).await;
        info!(pot_id = %id, mood = %reconciler::compute_mood(&pot), "Pot selected");
        Ok(pot)
    }

    pub async fn pots(&self) -> Result<Vec<Pot>, HubError> {
        Ok(self.pots.list().await?)
    }

    pub async fn pot(&self, id: PotId) -> Result<Pot, HubError> {
        Ok(self
            .pots
            .get(id)
            .await?
            .ok_or(RepositoryError::UnknownPot(id))?)
    }

    /// Apply one inbound message to the active pot.
    ///
    /// Returns the notification raised, if the message moved the pot into a
    /// problem mood. Messages arriving while no pot is active are ignored.
    pub async fn handle_message(&self, message: &Message) -> Result<Option<Notification>, HubError> {
        let Some(active) = self.state.active_pot().await else {
            debug!(topic = %message.topic, "No active pot, message ignored");
            return Ok(None);
        };

        let _edit = self.edits.lock().await;
        let pot = self.pot(active).await?;
        let updated = reconciler::on_telemetry(&message.topic, &message.payload, &pot)?;

        info!(
            pot_id = %updated.id,
            moisture = %updated.moisture_percent,
            "Telemetry applied"
        );

        self.pots.update(updated.clone()).await?;
        self.evaluate_mood(&pot, &updated).await
    }

    /// Switch an actuator and record the new state on the pot.
    ///
    /// The pot is updated even when the command could not be delivered; the
    /// returned [`Delivery`] says whether it reached the broker.
    #[instrument(skip(self), fields(pot_id = %id))]
    pub async fn set_actuator(
        &self,
        id: PotId,
        actuator: Actuator,
        state: SwitchState,
    ) -> Result<Delivery, HubError> {
        let _edit = self.edits.lock().await;
        let pot = self.pot(id).await?;

        let delivery = self.bridge.publish(actuator.topic(), state.as_command()).await;
        if !delivery.is_sent() {
            warn!(?delivery, "Command not delivered");
        }

        let mut updated = pot.clone();
        updated.set_actuator(actuator, state.is_on());
        self.pots.update(updated.clone()).await?;
        self.evaluate_mood(&pot, &updated).await?;

        Ok(delivery)
    }

    pub async fn notifications(&self) -> Result<Vec<Notification>, HubError> {
        Ok(self.notifications.list().await?)
    }

    pub async fn mark_notification_read(&self, id: NotificationId) -> Result<(), HubError> {
        let _edit = self.edits.lock().await;
        Ok(self.notifications.mark_read(id).await?)
    }

    pub async fn mark_all_notifications_read(&self) -> Result<usize, HubError> {
        let _edit = self.edits.lock().await;
        Ok(self.notifications.mark_all_read().await?)
    }

    pub async fn clear_notifications(&self) -> Result<(), HubError> {
        let _edit = self.edits.lock().await;
        Ok(self.notifications.clear().await?)
    }

    /// Callers hold `edits`.
    async fn evaluate_mood(&self, before: &Pot, after: &Pot) -> Result<Option<Notification>, HubError> {
        let previous = reconciler::compute_mood(before);
        let current = reconciler::compute_mood(after);

        if previous != current {
            info!(pot_id = %after.id, %previous, %current, "Mood changed");
        }

        let Some(notification) = reconciler::on_mood_changed(previous, current, &after.name) else {
            return Ok(None);
        };

        self.notifications.push(notification.clone()).await?;
        self.notifier.notify(&notification).await;
        Ok(Some(notification))
    }

    /// Apply inbound messages until `cancel` fires or the feed closes.
    pub async fn run(&self, mut rx: mpsc::Receiver<Message>, cancel: CancellationToken) {
        info!("Hub monitor started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Hub monitor shutting down");
                    break;
                }
                message = rx.recv() => {
                    let Some(message) = message else {
                        warn!("Message feed closed");
                        break;
                    };

                    match self.handle_message(&message).await {
                        Ok(_) => self.state.record_applied().await,
                        Err(HubError::Rejected(Rejected::UnrelatedTopic(topic))) => {
                            debug!(%topic, "Not telemetry");
                        }
                        Err(HubError::Rejected(reason)) => {
                            warn!(topic = %message.topic, %reason, "Telemetry rejected");
                            self.state.record_rejected().await;
                        }
                        Err(e) => error!(error = %e, topic = %message.topic, "Failed to apply message"),
                    }
                }
            }
        }

        let stats = self.state.stats().await;
        info!(
            applied = stats.applied,
            rejected = stats.rejected,
            uptime_secs = self.state.uptime_secs().await,
            "Hub monitor stopped"
        );
    }
}
