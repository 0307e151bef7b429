//! Change event publishing.
//!
//! Every observed change fans out to four topics, from coarse to fine, so
//! subscribers can pick the granularity they care about without client-side
//! filtering.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use serde_json::json;
use tracing::warn;

use crate::error::SyncResult;
use crate::types::ChangeEvent;

/// Pub/sub transport for change events.
///
/// Publishing is fire-and-forget: a topic without subscribers is not an error and
/// must not slow the publishing worker down.
pub trait Publisher {
    fn publish(&self, topic: String, payload: String) -> impl Future<Output = SyncResult<()>> + Send;
}

/// Serializes change events and fans them out to their topics.
#[derive(Debug)]
pub struct ChangeNotifier<P> {
    publisher: Arc<P>,
}

impl<P> Clone for ChangeNotifier<P> {
    fn clone(&self) -> Self {
        Self {
            publisher: self.publisher.clone(),
        }
    }
}

impl<P> ChangeNotifier<P>
where
    P: Publisher + Send + Sync,
{
    pub fn new(publisher: P) -> Self {
        Self {
            publisher: Arc::new(publisher),
        }
    }

    /// Publishes one change event to all four of its topics.
    ///
    /// A transport failure on one topic is logged and does not stop the fan-out;
    /// the event stream is best-effort and the store remains the source of truth.
    pub async fn publish_event(&self, event: &ChangeEvent) {
        let payload = match event {
            ChangeEvent::Upsert(order) => json!({
                "action": "upsert",
                "order": order,
            }),
            ChangeEvent::Remove { order_id, .. } => json!({
                "action": "remove",
                "order_id": order_id,
            }),
        };
        let payload = payload.to_string();

        let type_id = event.type_id();
        let region_id = event.region_id();
        let topics = [
            "all".to_string(),
            format!("item:{type_id}"),
            format!("region:{region_id}"),
            format!("item:{type_id}:region:{region_id}"),
        ];

        for topic in topics {
            if let Err(err) = self.publisher.publish(topic.clone(), payload.clone()).await {
                warn!(topic, "failed to publish change event: {err}");
            }
        }
    }

    /// Publishes a batch of events in order.
    pub async fn publish_all(&self, events: &[ChangeEvent]) {
        for event in events {
            self.publish_event(event).await;
        }
    }
}

/// In-memory implementation of [`Publisher`] backed by broadcast channels.
#[derive(Debug, Clone, Default)]
pub struct MemoryPublisher {
    topics: Arc<Mutex<HashMap<String, tokio::sync::broadcast::Sender<String>>>>,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to a topic, creating it if needed.
    pub fn subscribe(&self, topic: &str) -> tokio::sync::broadcast::Receiver<String> {
        let mut topics = self.topics.lock().expect("publisher lock poisoned");
        topics
            .entry(topic.to_string())
            .or_insert_with(|| tokio::sync::broadcast::channel(1024).0)
            .subscribe()
    }
}

impl Publisher for MemoryPublisher {
    async fn publish(&self, topic: String, payload: String) -> SyncResult<()> {
        let topics = self.topics.lock().expect("publisher lock poisoned");
        if let Some(sender) = topics.get(&topic) {
            // A send error just means nobody is listening right now.
            let _ = sender.send(payload);
        }

        Ok(())
    }
}
