use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};

/// Android API level that split Bluetooth access into scan and connect grants.
pub const ANDROID_SPLIT_BLUETOOTH_API: u32 = 31;

/// Where the hub runs. Decides which capabilities the link needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Platform {
    Android { api_level: u32 },
    Ios,
    Desktop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    BluetoothScan,
    BluetoothConnect,
    FineLocation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grant {
    Granted,
    Denied,
    NeverAskAgain,
}

/// The OS prompt asking the user for capabilities.
#[async_trait]
pub trait PermissionPrompt: Send + Sync {
    /// Request all of `permissions` in one prompt and report each outcome.
    async fn request(&self, permissions: &[Permission]) -> HashMap<Permission, Grant>;
}

/// Capabilities the link needs on `platform`.
pub fn required_permissions(platform: Platform) -> &'static [Permission] {
    match platform {
        Platform::Android { api_level } if api_level >= ANDROID_SPLIT_BLUETOOTH_API => &[
            Permission::BluetoothScan,
            Permission::BluetoothConnect,
            Permission::FineLocation,
        ],
        Platform::Android { .. } => &[Permission::FineLocation],
        Platform::Ios | Platform::Desktop => &[],
    }
}

/// Ask for the capabilities scanning and connecting need.
///
/// Returns `true` only when every required capability was granted. A `false`
/// result is not fatal: the caller should block scanning and re-prompt.
pub async fn request_link_permissions(platform: Platform, prompt: &dyn PermissionPrompt) -> bool {
    let required = required_permissions(platform);
    if required.is_empty() {
        return true;
    }

    let results = prompt.request(required).await;
    let denied: Vec<_> = required
        .iter()
        .filter(|p| results.get(*p) != Some(&Grant::Granted))
        .collect();

    if denied.is_empty() {
        info!(?platform, "Link permissions granted");
        true
    } else {
        warn!(?platform, ?denied, "Link permissions denied");
        false
    }
}

/// Prompt that answers every request with the same grant.
pub struct FixedPrompt(pub Grant);

#[async_trait]
impl PermissionPrompt for FixedPrompt {
    async fn request(&self, permissions: &[Permission]) -> HashMap<Permission, Grant> {
        permissions.iter().map(|p| (*p, self.0)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Deny(Permission);

    #[async_trait]
    impl PermissionPrompt for Deny {
        async fn request(&self, permissions: &[Permission]) -> HashMap<Permission, Grant> {
            permissions
                .iter()
                .map(|p| {
                    let grant = if *p == self.0 { Grant::Denied } else { Grant::Granted };
                    (*p, grant)
                })
                .collect()
        }
    }

    #[tokio::test]
    async fn new_android_needs_all_three() {
        let platform = Platform::Android { api_level: 33 };

        assert!(request_link_permissions(platform, &FixedPrompt(Grant::Granted)).await);
        assert!(!request_link_permissions(platform, &Deny(Permission::FineLocation)).await);
        assert!(!request_link_permissions(platform, &Deny(Permission::BluetoothScan)).await);
    }

    #[tokio::test]
    async fn old_android_needs_location_only() {
        let platform = Platform::Android { api_level: 29 };

        assert_eq!(required_permissions(platform), &[Permission::FineLocation]);
        assert!(request_link_permissions(platform, &Deny(Permission::BluetoothScan)).await);
        assert!(!request_link_permissions(platform, &Deny(Permission::FineLocation)).await);
    }

    #[tokio::test]
    async fn other_platforms_never_prompt() {
        let prompt = FixedPrompt(Grant::NeverAskAgain);

        assert!(request_link_permissions(Platform::Ios, &prompt).await);
        assert!(request_link_permissions(Platform::Desktop, &prompt).await);
    }
}
