use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_stream::{Stream, StreamExt, wrappers::BroadcastStream};

#[derive(Debug, Clone)]
pub struct Message {
    pub topic: String,
    pub payload: Bytes,
    pub received_at: DateTime<Utc>,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: Bytes) -> Self {
        Self { topic: topic.into(), payload, received_at: Utc::now() }
    }
}

pub type MessageStream = Box<dyn Stream<Item = Message> + Unpin + Send>;

/// Transport between the hub and devices: reports flow in, commands flow out.
#[async_trait]
pub trait Bus: Send + Sync {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<()>;
    async fn subscribe(&self, pattern: &str) -> Result<MessageStream>;
}

#[derive(Clone)]
pub struct InMemoryBus {
    tx: Arc<broadcast::Sender<Message>>,
}

impl Default for InMemoryBus {
    fn default() -> Self {
        let (tx, _rx) = broadcast::channel(1024);
        Self { tx: Arc::new(tx) }
    }
}

#[async_trait]
impl Bus for InMemoryBus {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<()> {
        let _ = self.tx.send(Message::new(topic, payload));
        Ok(())
    }

    async fn subscribe(&self, pattern: &str) -> Result<MessageStream> {
        Ok(filtered(BroadcastStream::new(self.tx.subscribe()), pattern))
    }
}

/// Adapts a broadcast receiver into a stream of messages matching `pattern`.
/// Lagged receivers skip the lost messages.
pub fn filtered(stream: BroadcastStream<Message>, pattern: &str) -> MessageStream {
    let pattern = pattern.to_string();
    let stream = stream.filter_map(move |item| match item {
        Ok(msg) if topic_matches(&pattern, &msg.topic) => Some(msg),
        _ => None,
    });
    Box::new(stream)
}

pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if pattern == topic {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix(".*") {
        return topic == prefix || topic.starts_with(&(prefix.to_string() + "."));
    }
    if let Some(prefix) = pattern.strip_suffix('*') {
        return topic.starts_with(prefix);
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_forms() {
        assert!(topic_matches("*", "casement.device.report.w1"));
        assert!(topic_matches("casement.device.report.w1", "casement.device.report.w1"));
        assert!(topic_matches("casement.device.*", "casement.device.report.w1"));
        assert!(topic_matches("casement.device.*", "casement.device"));
        assert!(!topic_matches("casement.device.*", "casement.devices"));
        assert!(topic_matches("casement.device.report.*", "casement.device.report.w1"));
        assert!(topic_matches("casement.dev*", "casement.devices"));
        assert!(!topic_matches("casement.device.command.w1", "casement.device.command.w10"));
    }

    #[tokio::test]
    async fn in_memory_bus_filters_by_pattern() -> Result<()> {
        let bus = InMemoryBus::default();
        let mut reports = bus.subscribe("casement.device.report.*").await?;

        bus.publish("casement.device.command.w1", Bytes::from_static(b"cmd")).await?;
        bus.publish("casement.device.report.w1", Bytes::from_static(b"report")).await?;

        let msg = reports.next().await.expect("report message");
        assert_eq!(msg.topic, "casement.device.report.w1");
        assert_eq!(msg.payload, Bytes::from_static(b"report"));
        Ok(())
    }
}
