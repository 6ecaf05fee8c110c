use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use jardim_core::{DeviceId, DiscoveredDevice};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::codec;
use crate::link::{CHARACTERISTIC_UUID, GattService, Link, Peripheral, SERVICE_UUID};

#[derive(Debug, thiserror::Error)]
pub enum MockLinkError {
    #[error("device {0} is out of range")]
    Unreachable(DeviceId),
    #[error("unknown device {0}")]
    UnknownDevice(DeviceId),
    #[error("unknown characteristic {0}")]
    UnknownCharacteristic(String),
    #[error("read failed")]
    ReadFailed,
}

/// One scripted answer to a characteristic read.
#[derive(Debug, Clone)]
pub enum MockRead {
    /// `{"status": .., "ip": ..}` encoded the way the firmware does it.
    Report { status: String, ip: Option<String> },
    /// Raw characteristic value, sent as is.
    Raw(String),
    /// The read itself fails at the link level.
    Fail,
}

impl MockRead {
    pub fn status(status: &str) -> Self {
        MockRead::Report {
            status: status.to_owned(),
            ip: None,
        }
    }

    /// The device joined the network and got `ip`.
    pub fn joined(ip: &str) -> Self {
        MockRead::Report {
            status: "success".to_owned(),
            ip: Some(ip.to_owned()),
        }
    }

    /// A value caught halfway through a firmware write.
    pub fn partial() -> Self {
        let full = codec::encode("{\"status\":\"connecting\",\"ip\":\"0.0.0.0\"}");
        MockRead::Raw(full[..full.len() / 2].to_owned())
    }

    fn encode(&self) -> Result<String, MockLinkError> {
        match self {
            MockRead::Report { status, ip } => {
                let json = match ip {
                    Some(ip) => serde_json::json!({ "status": status, "ip": ip }),
                    None => serde_json::json!({ "status": status }),
                };
                Ok(codec::encode(&json.to_string()))
            }
            MockRead::Raw(value) => Ok(value.clone()),
            MockRead::Fail => Err(MockLinkError::ReadFailed),
        }
    }
}

/// Something the simulated device observed, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockEvent {
    Connected,
    Write(String),
    Read,
    Disconnected,
}

/// A simulated pot controller.
pub struct MockDevice {
    id: DeviceId,
    name: Option<String>,
    advertisements: usize,
    reachable: bool,
    connect_delay: Duration,
    services: Vec<GattService>,
    script: Mutex<VecDeque<MockRead>>,
    events: Mutex<Vec<MockEvent>>,
}

impl MockDevice {
    pub fn new(id: impl Into<DeviceId>) -> Self {
        Self {
            id: id.into(),
            name: None,
            advertisements: 1,
            reachable: true,
            connect_delay: Duration::ZERO,
            services: vec![GattService {
                uuid: SERVICE_UUID.to_owned(),
                characteristics: vec![CHARACTERISTIC_UUID.to_owned()],
            }],
            script: Mutex::new(VecDeque::new()),
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(name.to_owned());
        self
    }

    /// Advertise `times` times per scan, like a radio picking up repeated beacons.
    pub fn advertised(mut self, times: usize) -> Self {
        self.advertisements = times;
        self
    }

    pub fn unreachable(mut self) -> Self {
        self.reachable = false;
        self
    }

    pub fn connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    /// Expose an unrelated service instead of the pot one.
    pub fn without_pot_service(mut self) -> Self {
        self.services = vec![GattService {
            uuid: "0000180f-0000-1000-8000-00805f9b34fb".to_owned(),
            characteristics: vec!["00002a19-0000-1000-8000-00805f9b34fb".to_owned()],
        }];
        self
    }

    /// Answers to successive reads. The last answer repeats once the script runs out.
    pub fn reads(self, reads: impl IntoIterator<Item = MockRead>) -> Self {
        lock(&self.script).extend(reads);
        self
    }

    pub fn id(&self) -> &DeviceId {
        &self.id
    }

    pub fn events(&self) -> Vec<MockEvent> {
        lock(&self.events).clone()
    }

    /// Decoded credential payloads written to the device.
    pub fn writes(&self) -> Vec<String> {
        lock(&self.events)
            .iter()
            .filter_map(|e| match e {
                MockEvent::Write(value) => codec::decode(value).ok(),
                _ => None,
            })
            .collect()
    }

    pub fn read_count(&self) -> usize {
        self.count(|e| *e == MockEvent::Read)
    }

    pub fn disconnect_count(&self) -> usize {
        self.count(|e| *e == MockEvent::Disconnected)
    }

    fn count(&self, predicate: impl Fn(&MockEvent) -> bool) -> usize {
        lock(&self.events).iter().filter(|e| predicate(e)).count()
    }

    fn record(&self, event: MockEvent) {
        lock(&self.events).push(event);
    }

    fn next_read(&self) -> MockRead {
        let mut script = lock(&self.script);
        if script.len() > 1 {
            script.pop_front().unwrap_or(MockRead::status("idle"))
        } else {
            script.front().cloned().unwrap_or(MockRead::status("idle"))
        }
    }

    fn advertisement(&self) -> DiscoveredDevice {
        DiscoveredDevice {
            device_id: self.id.clone(),
            advertised_name: self.name.as_deref().map(Into::into),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Mock link that simulates a handful of pots in radio range.
pub struct MockLink {
    devices: Vec<Arc<MockDevice>>,
    scan: Mutex<Option<mpsc::Sender<DiscoveredDevice>>>,
}

impl MockLink {
    pub fn new(devices: impl IntoIterator<Item = MockDevice>) -> Self {
        Self {
            devices: devices.into_iter().map(Arc::new).collect(),
            scan: Mutex::new(None),
        }
    }

    pub fn device(&self, id: &DeviceId) -> Option<Arc<MockDevice>> {
        self.devices.iter().find(|d| &d.id == id).cloned()
    }

    pub fn is_scanning(&self) -> bool {
        lock(&self.scan).is_some()
    }
}

#[async_trait]
impl Link for MockLink {
    type Error = MockLinkError;
    type Peripheral = MockPeripheral;

    async fn start_scan(
        &self,
        service: &str,
    ) -> Result<mpsc::Receiver<DiscoveredDevice>, Self::Error> {
        let advertisements: Vec<_> = self
            .devices
            .iter()
            .filter(|d| d.services.iter().any(|s| s.uuid.eq_ignore_ascii_case(service)))
            .flat_map(|d| std::iter::repeat_n(d.advertisement(), d.advertisements))
            .collect();

        let (tx, rx) = mpsc::channel(advertisements.len().max(1));
        for advertisement in advertisements {
            // Capacity covers every advertisement, so this cannot fill up.
            let _ = tx.try_send(advertisement);
        }

        info!(devices = self.devices.len(), "Mock scan started");

        // Holding the sender keeps the scan open until `stop_scan`.
        *lock(&self.scan) = Some(tx);
        Ok(rx)
    }

    async fn stop_scan(&self) -> Result<(), Self::Error> {
        if lock(&self.scan).take().is_some() {
            debug!("Mock scan stopped");
        }
        Ok(())
    }

    async fn connect(&self, device: &DeviceId) -> Result<Self::Peripheral, Self::Error> {
        let target = self
            .device(device)
            .ok_or_else(|| MockLinkError::UnknownDevice(device.clone()))?;

        if !target.connect_delay.is_zero() {
            tokio::time::sleep(target.connect_delay).await;
        }

        if !target.reachable {
            return Err(MockLinkError::Unreachable(device.clone()));
        }

        target.record(MockEvent::Connected);
        Ok(MockPeripheral { device: target })
    }
}

pub struct MockPeripheral {
    device: Arc<MockDevice>,
}

impl MockPeripheral {
    fn check(&self, service: &str, characteristic: &str) -> Result<(), MockLinkError> {
        let known = self
            .device
            .services
            .iter()
            .any(|s| s.uuid.eq_ignore_ascii_case(service) && s.has_characteristic(characteristic));

        if known {
            Ok(())
        } else {
            Err(MockLinkError::UnknownCharacteristic(characteristic.to_owned()))
        }
    }
}

#[async_trait]
impl Peripheral for MockPeripheral {
    type Error = MockLinkError;

    async fn discover_services(&mut self) -> Result<Vec<GattService>, Self::Error> {
        Ok(self.device.services.clone())
    }

    async fn write_with_response(
        &mut self,
        service: &str,
        characteristic: &str,
        value: &str,
    ) -> Result<(), Self::Error> {
        self.check(service, characteristic)?;
        self.device.record(MockEvent::Write(value.to_owned()));
        Ok(())
    }

    async fn read(&mut self, service: &str, characteristic: &str) -> Result<String, Self::Error> {
        self.check(service, characteristic)?;
        self.device.record(MockEvent::Read);
        self.device.next_read().encode()
    }

    async fn disconnect(&mut self) -> Result<(), Self::Error> {
        self.device.record(MockEvent::Disconnected);
        Ok(())
    }
}
