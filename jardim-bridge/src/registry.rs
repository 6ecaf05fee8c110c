use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::warn;

use crate::Message;

pub type Handler = Arc<dyn Fn(&Message) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "h{}", self.0)
    }
}

/// Whether `topic` matches the subscription `filter`.
///
/// `+` matches one level, a trailing `#` matches the rest (parent included).
/// Topics starting with `$` are never matched by a leading wildcard.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let mut filter = filter.split('/');
    let mut topic = topic.split('/');

    loop {
        match (filter.next(), topic.next()) {
            (Some("#"), _) => return filter.next().is_none(),
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

struct Route {
    filter: String,
    handler: Handler,
}

/// Topic-keyed message handlers.
#[derive(Default)]
pub struct Registry {
    routes: DashMap<HandlerId, Route>,
    next_id: AtomicU64,
}

impl Registry {
    pub fn insert(&self, filter: &str, handler: Handler) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.routes.insert(
            id,
            Route {
                filter: filter.to_owned(),
                handler,
            },
        );
        id
    }

    /// Register a handler forwarding matches into a bounded channel.
    ///
    /// Messages are dropped with a warning while the channel is full.
    pub fn channel(&self, filter: &str, capacity: usize) -> (HandlerId, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(capacity);
        let id = self.insert(
            filter,
            Arc::new(move |message: &Message| {
                if let Err(e) = tx.try_send(message.clone()) {
                    warn!(topic = %message.topic, error = %e, "Handler channel rejected message");
                }
            }),
        );
        (id, rx)
    }

    pub fn remove(&self, id: HandlerId) -> bool {
        self.routes.remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Deliver `message` to every matching handler. Returns how many ran.
    pub fn dispatch(&self, message: &Message) -> usize {
        // Collect first so handlers may add or remove routes.
        let matching: Vec<Handler> = self
            .routes
            .iter()
            .filter(|route| topic_matches(&route.filter, &message.topic))
            .map(|route| Arc::clone(&route.handler))
            .collect();

        for handler in &matching {
            handler(message);
        }

        matching.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn exact_and_wildcard_filters() {
        assert!(topic_matches("plant/sensors/humidity", "plant/sensors/humidity"));
        assert!(!topic_matches("plant/sensors/humidity", "plant/sensors/light"));
        assert!(topic_matches("plant/+/humidity", "plant/sensors/humidity"));
        assert!(!topic_matches("plant/+", "plant/sensors/humidity"));
        assert!(topic_matches("plant/#", "plant/sensors/humidity"));
        assert!(topic_matches("plant/#", "plant"));
        assert!(topic_matches("#", "jardim/01H/status"));
        assert!(!topic_matches("#", "$SYS/broker/uptime"));
        assert!(!topic_matches("plant/#/x", "plant/a/x"));
    }

    fn counter(registry: &Registry, filter: &str) -> (HandlerId, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&hits);
        let id = registry.insert(
            filter,
            Arc::new(move |_: &Message| {
                seen.fetch_add(1, Ordering::SeqCst);
            }),
        );
        (id, hits)
    }

    #[test]
    fn every_matching_handler_runs() {
        let registry = Registry::default();
        let (_, exact) = counter(&registry, "plant/sensors/humidity");
        let (_, wildcard) = counter(&registry, "plant/#");
        let (_, other) = counter(&registry, "jardim/+/status");

        let ran = registry.dispatch(&Message::new("plant/sensors/humidity", "42"));

        assert_eq!(ran, 2);
        assert_eq!(exact.load(Ordering::SeqCst), 1);
        assert_eq!(wildcard.load(Ordering::SeqCst), 1);
        assert_eq!(other.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn removed_handler_stops_receiving() {
        let registry = Registry::default();
        let (id, hits) = counter(&registry, "#");

        registry.dispatch(&Message::new("a", "1"));
        assert!(registry.remove(id));
        assert!(!registry.remove(id));
        registry.dispatch(&Message::new("a", "2"));

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn channel_handler_forwards_and_drops_when_full() {
        let registry = Registry::default();
        let (_, mut rx) = registry.channel("plant/#", 1);

        registry.dispatch(&Message::new("plant/sensors/humidity", "40"));
        registry.dispatch(&Message::new("plant/sensors/humidity", "41"));

        assert_eq!(rx.recv().await.map(|m| m.payload), Some("40".to_owned()));
        assert!(rx.try_recv().is_err());
    }
}
