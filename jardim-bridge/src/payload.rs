use serde::Serialize;

use crate::BridgeError;

/// Outbound message body.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Sent verbatim.
    Text(String),
    /// Serialized to JSON before sending.
    Structured(serde_json::Value),
}

impl Payload {
    pub fn structured<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        Ok(Payload::Structured(serde_json::to_value(value)?))
    }

    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Payload::Text(text) => text.into_bytes(),
            Payload::Structured(value) => value.to_string().into_bytes(),
        }
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_owned())
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        Payload::Structured(value)
    }
}

/// Inbound message, payload decoded as UTF-8 text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub payload: String,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    pub(crate) fn from_bytes(topic: String, payload: &[u8]) -> Self {
        Self {
            topic,
            payload: String::from_utf8_lossy(payload).into_owned(),
        }
    }
}

/// What happened to an outbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Handed to the broker client.
    Sent,
    /// Recorded; it goes out on the next connection.
    Deferred,
    /// Discarded.
    Dropped(BridgeError),
}

impl Delivery {
    pub fn is_sent(&self) -> bool {
        matches!(self, Delivery::Sent)
    }
}

/// Outcome of the initial connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectStatus {
    Connected,
    /// Not acknowledged yet. The event loop keeps retrying.
    Pending,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_is_sent_verbatim() {
        assert_eq!(Payload::from("ON").into_bytes(), b"ON");
    }

    #[test]
    fn structured_is_json() {
        #[derive(Serialize)]
        struct Reading {
            value: f64,
        }

        let payload = Payload::structured(&Reading { value: 42.5 }).unwrap();
        assert_eq!(payload.into_bytes(), br#"{"value":42.5}"#);
    }

    #[test]
    fn only_sent_counts_as_sent() {
        assert!(Delivery::Sent.is_sent());
        assert!(!Delivery::Deferred.is_sent());

        let dropped = Delivery::Dropped(BridgeError::TransportUnavailable);
        assert!(!dropped.is_sent());
        assert_eq!(dropped, Delivery::Dropped(BridgeError::TransportUnavailable));
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        let message = Message::from_bytes("t".into(), &[b'4', 0xff, b'2']);
        assert_eq!(message.payload, "4\u{fffd}2");
    }
}
