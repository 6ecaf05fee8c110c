use async_trait::async_trait;
use jardim_core::{DeviceId, DiscoveredDevice};
use tokio::sync::mpsc;

/// Service the pot firmware exposes for provisioning.
pub const SERVICE_UUID: &str = "12345678-1234-1234-1234-1234567890ab";

/// Read/write characteristic carrying credentials in and status out.
pub const CHARACTERISTIC_UUID: &str = "abcd1234-5678-90ab-cdef-1234567890ab";

/// A service exposed by a connected peer and the characteristics under it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattService {
    pub uuid: String,
    pub characteristics: Vec<String>,
}

impl GattService {
    pub fn has_characteristic(&self, uuid: &str) -> bool {
        self.characteristics.iter().any(|c| c.eq_ignore_ascii_case(uuid))
    }
}

/// Trait for a short-range, characteristic-based wireless link.
///
/// The link supports at most one connection at a time and cannot scan while
/// connecting; [`crate::Provisioner`] is responsible for honouring that.
#[async_trait]
pub trait Link: Send + Sync + 'static {
    /// Error type for this link implementation.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Connected peer handle.
    type Peripheral: Peripheral<Error = Self::Error>;

    /// Start discovering peers advertising `service`.
    ///
    /// Returns a channel receiving every advertisement the radio sees,
    /// duplicates included. The channel closes when the scan ends.
    async fn start_scan(
        &self,
        service: &str,
    ) -> Result<mpsc::Receiver<DiscoveredDevice>, Self::Error>;

    /// Stop any discovery in progress. Must be safe to call when idle.
    async fn stop_scan(&self) -> Result<(), Self::Error>;

    /// Open a connection to `device`.
    async fn connect(&self, device: &DeviceId) -> Result<Self::Peripheral, Self::Error>;
}

/// A connected peer.
///
/// Characteristic values cross this boundary as base64 text, the way the
/// mobile BLE stacks hand them out.
#[async_trait]
pub trait Peripheral: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Enumerate services and their characteristics.
    async fn discover_services(&mut self) -> Result<Vec<GattService>, Self::Error>;

    /// Write `value`, waiting for the link-level acknowledgement.
    async fn write_with_response(
        &mut self,
        service: &str,
        characteristic: &str,
        value: &str,
    ) -> Result<(), Self::Error>;

    /// Read the current value of a characteristic.
    async fn read(&mut self, service: &str, characteristic: &str) -> Result<String, Self::Error>;

    /// Release the connection.
    async fn disconnect(&mut self) -> Result<(), Self::Error>;
}
