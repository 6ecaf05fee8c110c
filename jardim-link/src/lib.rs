//! Short-range provisioning for pot controllers.
//!
//! A [`Provisioner`] drives a [`Link`]: it scans for controllers advertising
//! the pot service and hands them Wi-Fi credentials, polling until the device
//! reports an address on the network.

pub mod codec;
pub mod error;
pub mod link;
pub mod mock;
pub mod permissions;
mod provisioner;

pub use error::ProvisioningError;
pub use link::{CHARACTERISTIC_UUID, GattService, Link, Peripheral, SERVICE_UUID};
pub use permissions::{Platform, request_link_permissions};
pub use provisioner::{PollOutcome, Provisioner, SessionConfig, SessionState, interpret};
