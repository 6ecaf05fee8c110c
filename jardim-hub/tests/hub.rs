use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use jardim_bridge::{Bridge, BridgeConfig, BridgeError, Delivery, Message};
use jardim_core::{
    Actuator, DeviceId, DiscoveredDevice, MacAddress, Notification, PlantMood, PotDraft,
    ProvisioningResult, SwitchState, topics,
};
use jardim_hub::{FileStore, Hub, HubError, MemoryStore, Notifier, Rejected, RepositoryError};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct RecordingNotifier {
    seen: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    fn moods(&self) -> Vec<PlantMood> {
        self.seen.lock().unwrap().iter().map(|n| n.mood).collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: &Notification) {
        self.seen.lock().unwrap().push(notification.clone());
    }
}

fn hub() -> (Hub<MemoryStore>, Arc<RecordingNotifier>) {
    let notifier = Arc::new(RecordingNotifier::default());
    let hub = Hub::new(
        Bridge::new(BridgeConfig::default()),
        MemoryStore::default(),
        notifier.clone(),
    );
    (hub, notifier)
}

fn draft(name: &str) -> PotDraft {
    PotDraft {
        name: name.into(),
        plant_popular_name: "Jiboia".into(),
        plant_species: "Epipremnum aureum".into(),
        location_label: "Sala".into(),
        ..Default::default()
    }
}

fn humidity(value: &str) -> Message {
    Message::new(topics::HUMIDITY, value)
}

#[tokio::test]
async fn pot_without_device() -> Result<(), HubError> {
    let (hub, _) = hub();

    let pot = hub.add_pot(draft("Sala"), None).await?;

    assert_eq!(pot.moisture_percent.value(), 50.0);
    assert!(!pot.light_on && !pot.pump_on);
    assert_eq!(pot.mac_address, MacAddress::unknown());
    assert!(!pot.has_device());
    assert!(!pot.is_online());
    assert_eq!(hub.pots().await?, vec![pot.clone()]);
    assert!(hub.bridge().subscriptions().contains(&topics::pot_status(pot.id)));
    assert_eq!(hub.state().active_pot().await, Some(pot.id));
    Ok(())
}

#[tokio::test]
async fn pot_with_provisioned_device() -> Result<(), HubError> {
    let (hub, _) = hub();
    let device = DiscoveredDevice {
        device_id: DeviceId::from("AA:BB:CC:DD:EE:01"),
        advertised_name: Some("ESP32-Pot".into()),
    };
    let result = ProvisioningResult {
        ip: "192.168.1.50".into(),
        ssid: "home".into(),
    };

    let pot = hub.add_pot(draft("Varanda"), Some((device, result))).await?;

    assert!(pot.is_online());
    assert_eq!(pot.mac_address.0, "AA:BB:CC:DD:EE:01");
    assert_eq!(pot.ip_address, "192.168.1.50");
    assert_eq!(pot.wifi_ssid, "home");
    Ok(())
}

#[tokio::test]
async fn one_notification_per_problem_transition() -> Result<(), HubError> {
    let (hub, notifier) = hub();
    let pot = hub.add_pot(draft("Sala"), None).await?;
    hub.set_actuator(pot.id, Actuator::Light, SwitchState::On).await?;

    let first = hub.handle_message(&humidity("20")).await?;
    let repeat = hub.handle_message(&humidity("25")).await?;
    let recovered = hub.handle_message(&humidity("60")).await?;

    assert_eq!(first.map(|n| n.mood), Some(PlantMood::Thirsty));
    assert!(repeat.is_none());
    assert!(recovered.is_none());
    assert_eq!(notifier.moods(), vec![PlantMood::Thirsty]);
    assert_eq!(hub.pot(pot.id).await?.moisture_percent.value(), 60.0);

    let log = hub.notifications().await?;
    assert_eq!(log.len(), 1);
    assert!(log[0].title.contains("Sala"));
    Ok(())
}

#[tokio::test]
async fn switching_the_light_off_scares_the_plant() -> Result<(), HubError> {
    let (hub, notifier) = hub();
    let pot = hub.add_pot(draft("Sala"), None).await?;

    hub.set_actuator(pot.id, Actuator::Light, SwitchState::On).await?;
    let delivery = hub.set_actuator(pot.id, Actuator::Light, SwitchState::Off).await?;

    // No broker in tests: the command is dropped but the pot still records it.
    assert_eq!(delivery, Delivery::Dropped(BridgeError::TransportUnavailable));
    assert!(!hub.pot(pot.id).await?.light_on);
    assert_eq!(notifier.moods(), vec![PlantMood::Scared]);

    hub.set_actuator(pot.id, Actuator::Pump, SwitchState::On).await?;
    assert!(hub.pot(pot.id).await?.pump_on);
    assert_eq!(notifier.moods().len(), 1);
    Ok(())
}

#[tokio::test]
async fn notifications_are_newest_first() -> Result<(), HubError> {
    let (hub, _) = hub();
    let pot = hub.add_pot(draft("Sala"), None).await?;

    hub.handle_message(&humidity("10")).await?;
    hub.handle_message(&humidity("70")).await?;

    let log = hub.notifications().await?;
    assert_eq!(
        log.iter().map(|n| n.mood).collect::<Vec<_>>(),
        vec![PlantMood::Scared, PlantMood::Thirsty]
    );

    hub.mark_notification_read(log[1].id).await?;
    assert_eq!(hub.mark_all_notifications_read().await?, 1);
    assert!(hub.notifications().await?.iter().all(|n| n.read));

    hub.clear_notifications().await?;
    assert!(hub.notifications().await?.is_empty());
    assert_eq!(hub.pot(pot.id).await?.moisture_percent.value(), 70.0);
    Ok(())
}

#[tokio::test]
async fn rejected_telemetry_leaves_pot_unchanged() -> Result<(), HubError> {
    let (hub, notifier) = hub();
    let pot = hub.add_pot(draft("Sala"), None).await?;

    for payload in ["wet", "101", "-3"] {
        let err = hub.handle_message(&humidity(payload)).await.unwrap_err();
        assert!(matches!(err, HubError::Rejected(_)));
    }
    let err = hub
        .handle_message(&Message::new(topics::pot_status(pot.id), "online"))
        .await
        .unwrap_err();
    assert!(matches!(err, HubError::Rejected(Rejected::UnrelatedTopic(_))));

    assert_eq!(hub.pot(pot.id).await?, pot);
    assert!(notifier.moods().is_empty());
    Ok(())
}

#[tokio::test]
async fn telemetry_goes_to_the_selected_pot() -> Result<(), HubError> {
    let (hub, _) = hub();
    let first = hub.add_pot(draft("Sala"), None).await?;
    let second = hub.add_pot(draft("Varanda"), None).await?;

    hub.handle_message(&humidity("40")).await?;
    hub.select_pot(second.id).await?;
    hub.handle_message(&humidity("80")).await?;

    assert_eq!(hub.pot(first.id).await?.moisture_percent.value(), 40.0);
    assert_eq!(hub.pot(second.id).await?.moisture_percent.value(), 80.0);
    Ok(())
}

#[tokio::test]
async fn removing_the_active_pot() -> Result<(), HubError> {
    let (hub, _) = hub();
    let pot = hub.add_pot(draft("Sala"), None).await?;

    hub.remove_pot(pot.id).await?;

    assert!(hub.pots().await?.is_empty());
    assert!(!hub.bridge().subscriptions().contains(&topics::pot_status(pot.id)));
    assert_eq!(hub.state().active_pot().await, None);
    assert!(hub.handle_message(&humidity("10")).await?.is_none());

    let err = hub.remove_pot(pot.id).await.unwrap_err();
    assert!(matches!(err, HubError::Repository(RepositoryError::UnknownPot(_))));
    Ok(())
}

#[tokio::test]
async fn monitor_applies_until_cancelled() -> Result<(), HubError> {
    let (hub, notifier) = hub();
    let pot = hub.add_pot(draft("Sala"), None).await?;
    let (tx, rx) = mpsc::channel(8);
    let cancel = CancellationToken::new();

    tx.send(humidity("15")).await.unwrap();
    tx.send(humidity("oops")).await.unwrap();
    tx.send(Message::new(topics::LIGHT, "ON")).await.unwrap();

    let stop = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        stop.cancel();
    });
    hub.run(rx, cancel).await;

    assert_eq!(hub.pot(pot.id).await?.moisture_percent.value(), 15.0);
    assert_eq!(notifier.moods(), vec![PlantMood::Thirsty]);

    let stats = hub.state().stats().await;
    assert_eq!(stats.applied, 1);
    assert_eq!(stats.rejected, 1);
    Ok(())
}

#[tokio::test]
async fn start_requests_known_topics() -> Result<(), HubError> {
    let (hub, _) = hub();
    let pot = hub.add_pot(draft("Sala"), None).await?;

    let _rx = hub.start(16).await?;

    let subscriptions = hub.bridge().subscriptions();
    assert!(subscriptions.contains(&topics::HUMIDITY.to_owned()));
    assert!(subscriptions.contains(&topics::pot_status(pot.id)));
    assert!(!hub.bridge().is_connected());
    Ok(())
}

#[tokio::test]
async fn concurrent_telemetry_and_commands_keep_both_edits() -> Result<(), HubError> {
    let dir = TempDir::new().expect("temp dir");
    let hub = Hub::new(
        Bridge::new(BridgeConfig::default()),
        FileStore::new(dir.path().join("store.json")),
        Arc::new(RecordingNotifier::default()),
    );
    let pot = hub.add_pot(draft("Sala"), None).await?;

    for round in 0..50u32 {
        let moisture = 40 + round % 50;
        let light = if round % 2 == 0 { SwitchState::On } else { SwitchState::Off };

        let message = humidity(&moisture.to_string());
        let (applied, switched) = tokio::join!(
            hub.handle_message(&message),
            hub.set_actuator(pot.id, Actuator::Light, light),
        );
        applied?;
        switched?;

        let stored = hub.pot(pot.id).await?;
        assert_eq!(stored.moisture_percent.value(), f64::from(moisture), "round {round}");
        assert_eq!(stored.light_on, light.is_on(), "round {round}");
    }
    Ok(())
}
