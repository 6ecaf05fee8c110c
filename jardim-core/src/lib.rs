use std::fmt;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

pub mod topics;

// Optional free-text fields are rarely edited after creation, so they are
// kept as `Box<str>` like the rest of the read-mostly records.
type BoxStr = Box<str>;

/// Unique identifier for a pot record. Assigned once at creation and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PotId(pub Ulid);

impl PotId {
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for PotId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for PotId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// Unique identifier for a stored notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NotificationId(pub Ulid);

impl fmt::Display for NotificationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for NotificationId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// Transport-level address of a short-range link peer.
///
/// This is what the link layer hands back while scanning and what it expects
/// when connecting; it doubles as the dedup key for one scan session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub String);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// Device identifier stored on a pot. `UNKNOWN` when no device is linked.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MacAddress(pub String);

impl MacAddress {
    pub const UNKNOWN: &'static str = "UNKNOWN";

    pub fn unknown() -> Self {
        Self(Self::UNKNOWN.to_owned())
    }

    pub fn is_unknown(&self) -> bool {
        self.0 == Self::UNKNOWN
    }
}

impl Default for MacAddress {
    fn default() -> Self {
        Self::unknown()
    }
}

impl From<&DeviceId> for MacAddress {
    fn from(device: &DeviceId) -> Self {
        Self(device.0.clone())
    }
}

/// Soil moisture as a percentage in the range 0–100 (inclusive).
///
/// Values outside the range, and NaN, are rejected rather than clamped so
/// malformed telemetry stays visible to the caller.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Moisture(f64);

#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
#[error("moisture {0} is outside 0..=100")]
pub struct MoistureOutOfRange(pub f64);

impl Moisture {
    pub const MIN: f64 = 0.0;
    pub const MAX: f64 = 100.0;

    pub fn new(value: f64) -> Result<Self, MoistureOutOfRange> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Ok(Self(value))
        } else {
            Err(MoistureOutOfRange(value))
        }
    }

    pub fn value(self) -> f64 {
        self.0
    }
}

impl TryFrom<f64> for Moisture {
    type Error = MoistureOutOfRange;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Moisture> for f64 {
    fn from(value: Moisture) -> Self {
        value.0
    }
}

impl fmt::Display for Moisture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}

/// A smart pot: one plant's container, its device linkage and live state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pot {
    /// Stable identity of this pot.
    pub id: PotId,
    /// User-facing name.
    pub name: String,
    /// Common name of the plant (e.g. "Jiboia").
    #[serde(default)]
    pub plant_popular_name: String,
    /// Botanical species (e.g. "Epipremnum aureum").
    #[serde(default)]
    pub plant_species: String,
    /// Where the pot lives.
    #[serde(default)]
    pub location_label: String,
    pub image_ref: Option<BoxStr>,
    pub description: Option<BoxStr>,
    /// Last known soil moisture.
    pub moisture_percent: Moisture,
    pub light_on: bool,
    pub pump_on: bool,
    /// Linked device, `UNKNOWN` when the pot was created without one.
    #[serde(default)]
    pub mac_address: MacAddress,
    /// Network the device joined during provisioning. Empty when never provisioned.
    #[serde(default)]
    pub wifi_ssid: String,
    /// Address the device reported during provisioning. Empty when never provisioned.
    #[serde(default)]
    pub ip_address: String,
}

impl Pot {
    /// Moisture assigned to a freshly created pot until telemetry arrives.
    pub const INITIAL_MOISTURE: f64 = 50.0;

    /// Build a new pot from user input, without any device linked.
    pub fn from_draft(draft: PotDraft) -> Self {
        Self {
            id: PotId::new(),
            name: draft.name,
            plant_popular_name: draft.plant_popular_name,
            plant_species: draft.plant_species,
            location_label: draft.location_label,
            image_ref: draft.image_ref.map(Into::into),
            description: draft.description.map(Into::into),
            moisture_percent: Moisture(Self::INITIAL_MOISTURE),
            light_on: false,
            pump_on: false,
            mac_address: MacAddress::unknown(),
            wifi_ssid: String::new(),
            ip_address: String::new(),
        }
    }

    /// Record the outcome of a successful provisioning session.
    pub fn link_device(&mut self, device: &DeviceId, result: &ProvisioningResult) {
        self.mac_address = MacAddress::from(device);
        self.wifi_ssid = result.ssid.clone();
        self.ip_address = result.ip.clone();
    }

    pub fn has_device(&self) -> bool {
        !self.mac_address.is_unknown()
    }

    pub fn is_online(&self) -> bool {
        self.has_device() && !self.wifi_ssid.is_empty() && !self.ip_address.is_empty()
    }

    pub fn actuator(&self, actuator: Actuator) -> bool {
        match actuator {
            Actuator::Light => self.light_on,
            Actuator::Pump => self.pump_on,
        }
    }

    pub fn set_actuator(&mut self, actuator: Actuator, on: bool) {
        match actuator {
            Actuator::Light => self.light_on = on,
            Actuator::Pump => self.pump_on = on,
        }
    }
}

/// The user-entered half of a pot, before an id and live state exist.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PotDraft {
    pub name: String,
    pub plant_popular_name: String,
    pub plant_species: String,
    pub location_label: String,
    pub image_ref: Option<String>,
    pub description: Option<String>,
}

/// A peer seen while scanning. Lives for one scan session and is never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredDevice {
    pub device_id: DeviceId,
    pub advertised_name: Option<BoxStr>,
}

/// What a device reports after joining the network with the credentials it was given.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningResult {
    pub ip: String,
    pub ssid: String,
}

/// Derived wellbeing of a plant. Never stored on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlantMood {
    Happy,
    Thirsty,
    Scared,
}

impl fmt::Display for PlantMood {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PlantMood::Happy => "happy",
            PlantMood::Thirsty => "thirsty",
            PlantMood::Scared => "scared",
        })
    }
}

/// A mood alert raised for a pot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: NotificationId,
    pub title: String,
    pub body: String,
    /// The mood the pot moved into.
    pub mood: PlantMood,
    pub created_at: jiff::Timestamp,
    pub read: bool,
}

/// Switchable outputs on a pot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Actuator {
    Light,
    Pump,
}

impl Actuator {
    /// Topic the command for this actuator is published on.
    pub fn topic(self) -> &'static str {
        match self {
            Actuator::Light => topics::LIGHT,
            Actuator::Pump => topics::PUMP,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwitchState {
    On,
    Off,
}

impl SwitchState {
    /// Wire form understood by the pot firmware.
    pub fn as_command(self) -> &'static str {
        match self {
            SwitchState::On => "ON",
            SwitchState::Off => "OFF",
        }
    }

    pub fn is_on(self) -> bool {
        self == SwitchState::On
    }
}

impl From<bool> for SwitchState {
    fn from(on: bool) -> Self {
        if on { SwitchState::On } else { SwitchState::Off }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft() -> PotDraft {
        PotDraft {
            name: "Fern".into(),
            plant_popular_name: "Samambaia".into(),
            plant_species: "Nephrolepis exaltata".into(),
            location_label: "Balcony".into(),
            image_ref: None,
            description: Some("north window".into()),
        }
    }

    #[test]
    fn moisture_rejects_out_of_range() {
        assert!(Moisture::new(0.0).is_ok());
        assert!(Moisture::new(100.0).is_ok());
        assert_eq!(Moisture::new(100.5), Err(MoistureOutOfRange(100.5)));
        assert!(Moisture::new(-1.0).is_err());
        assert!(Moisture::new(f64::NAN).is_err());
    }

    #[test]
    fn new_pot_has_no_device() {
        let pot = Pot::from_draft(draft());

        assert_eq!(pot.moisture_percent.value(), Pot::INITIAL_MOISTURE);
        assert!(!pot.light_on);
        assert!(!pot.pump_on);
        assert!(!pot.has_device());
        assert!(!pot.is_online());
    }

    #[test]
    fn linked_pot_is_online() {
        let mut pot = Pot::from_draft(draft());
        let result = ProvisioningResult {
            ip: "192.168.1.5".into(),
            ssid: "home".into(),
        };

        pot.link_device(&DeviceId::from("AA:BB:CC:DD:EE:FF"), &result);

        assert!(pot.has_device());
        assert!(pot.is_online());
        assert_eq!(pot.mac_address.0, "AA:BB:CC:DD:EE:FF");
    }

    #[test]
    fn device_without_network_is_not_online() {
        let mut pot = Pot::from_draft(draft());
        pot.mac_address = MacAddress("AA:BB:CC:DD:EE:FF".into());

        assert!(pot.has_device());
        assert!(!pot.is_online());
    }

    #[test]
    fn pot_json_uses_camel_case_fields() {
        let pot = Pot::from_draft(draft());
        let json = serde_json::to_value(&pot).unwrap();

        assert_eq!(json["plantPopularName"], "Samambaia");
        assert_eq!(json["moisturePercent"], 50.0);
        assert_eq!(json["macAddress"], "UNKNOWN");
        assert_eq!(json["ipAddress"], "");
    }

    #[test]
    fn out_of_range_moisture_fails_to_deserialize() {
        let mut json = serde_json::to_value(Pot::from_draft(draft())).unwrap();
        json["moisturePercent"] = serde_json::json!(140.0);

        assert!(serde_json::from_value::<Pot>(json).is_err());
    }

    #[test]
    fn actuator_commands() {
        assert_eq!(Actuator::Light.topic(), "plant/actuators/light");
        assert_eq!(Actuator::Pump.topic(), "plant/actuators/pump");
        assert_eq!(SwitchState::from(true).as_command(), "ON");
        assert_eq!(SwitchState::Off.as_command(), "OFF");
    }
}
