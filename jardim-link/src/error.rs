/// Why a provisioning session did not produce a [`ProvisioningResult`].
///
/// Returned as a value so callers can render a specific message per cause.
///
/// [`ProvisioningResult`]: jardim_core::ProvisioningResult
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProvisioningError {
    /// Required OS capabilities were not granted. Re-prompt and try again.
    #[error("link permissions were not granted")]
    PermissionDenied,

    /// The device did not accept a connection within the bound. Rescan.
    #[error("device unreachable: {0}")]
    LinkUnreachable(String),

    /// The connected device does not expose the pot service. Not a retry target.
    #[error("device does not expose the provisioning service")]
    ProtocolMismatch,

    /// The link dropped the credential write.
    #[error("failed to write credentials: {0}")]
    WriteFailed(String),

    /// The device reported it could not join the network, usually a bad password.
    #[error("device rejected the credentials (status {status:?})")]
    CredentialsRejected { status: String },

    /// No terminal status within the polling ceiling. The device may still have joined.
    #[error("no answer from device after {attempts} reads")]
    ProvisioningTimeout { attempts: u32 },

    /// Another session already owns the link.
    #[error("a provisioning session is already in progress")]
    SessionBusy,

    /// The caller cancelled the session.
    #[error("provisioning cancelled")]
    Cancelled,
}

impl ProvisioningError {
    /// Whether retrying with the same inputs can reasonably succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProvisioningError::LinkUnreachable(_)
                | ProvisioningError::WriteFailed(_)
                | ProvisioningError::ProvisioningTimeout { .. }
                | ProvisioningError::SessionBusy
        )
    }
}
