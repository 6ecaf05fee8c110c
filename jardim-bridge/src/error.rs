use thiserror::Error;

/// Why an outbound request did not reach the broker.
///
/// Never returned as `Err`; carried inside [`crate::Delivery::Dropped`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    #[error("broker connection is not available")]
    TransportUnavailable,
    #[error("client error: {0}")]
    Client(String),
}
