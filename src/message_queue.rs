/*!
 * # Message Queue
 *
 * Internal queue for work that has to be retried later, such as payment
 * notifications that could not be completed on first delivery.
 */

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Topic carrying `{ "payment_id": ... }` payloads for reprocessing.
pub const PAYMENT_REPROCESS_TOPIC: &str = "payments.reprocess";

/// Message queue errors
#[derive(Error, Debug)]
pub enum MessageQueueError {
    #[error("Queue is full")]
    QueueFull,
    #[error("Unknown message: {0}")]
    UnknownMessage(Uuid),
    #[error("Message {id} exhausted its {attempts} retries")]
    RetriesExhausted { id: Uuid, attempts: u32 },
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// Message envelope for queue items
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub topic: String,
    pub payload: serde_json::Value,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub retry_count: u32,
    pub max_retries: u32,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            topic: topic.into(),
            payload,
            timestamp: chrono::Utc::now(),
            retry_count: 0,
            max_retries: 3,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn payload_as<T: serde::de::DeserializeOwned>(&self) -> Result<T, MessageQueueError> {
        serde_json::from_value(self.payload.clone())
            .map_err(|e| MessageQueueError::SerializationError(e.to_string()))
    }
}

/// Message queue trait for different implementations.
///
/// `subscribe` hands out at most one copy of a message; it stays in flight until it is
/// acknowledged, or negatively acknowledged and re-queued.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    async fn publish(&self, message: Message) -> Result<(), MessageQueueError>;
    async fn subscribe(&self, topic: &str) -> Result<Option<Message>, MessageQueueError>;
    async fn ack(&self, message_id: &Uuid) -> Result<(), MessageQueueError>;
    /// Re-queues the message with an incremented retry count. Returns
    /// [`MessageQueueError::RetriesExhausted`] and drops it once `max_retries` is reached.
    async fn nack(&self, message_id: &Uuid) -> Result<(), MessageQueueError>;
}

/// In-memory message queue implementation
#[derive(Debug)]
pub struct InMemoryMessageQueue {
    queues: Mutex<HashMap<String, VecDeque<Message>>>,
    in_flight: DashMap<Uuid, Message>,
    max_size: usize,
}

impl Default for InMemoryMessageQueue {
    fn default() -> Self {
        Self::with_max_size(1000)
    }
}

impl InMemoryMessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_size(max_size: usize) -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            in_flight: DashMap::new(),
            max_size,
        }
    }

    /// Messages waiting on `topic`, excluding in-flight ones.
    pub async fn pending(&self, topic: &str) -> usize {
        self.queues.lock().await.get(topic).map_or(0, VecDeque::len)
    }
}

#[async_trait]
impl MessageQueue for InMemoryMessageQueue {
    async fn publish(&self, message: Message) -> Result<(), MessageQueueError> {
        let mut queues = self.queues.lock().await;
        let queue = queues.entry(message.topic.clone()).or_default();

        if queue.len() >= self.max_size {
            return Err(MessageQueueError::QueueFull);
        }

        queue.push_back(message);
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<Option<Message>, MessageQueueError> {
        let mut queues = self.queues.lock().await;
        let message = queues.get_mut(topic).and_then(VecDeque::pop_front);
        if let Some(message) = &message {
            self.in_flight.insert(message.id, message.clone());
        }
        Ok(message)
    }

    async fn ack(&self, message_id: &Uuid) -> Result<(), MessageQueueError> {
        self.in_flight
            .remove(message_id)
            .map(|_| ())
            .ok_or(MessageQueueError::UnknownMessage(*message_id))
    }

    async fn nack(&self, message_id: &Uuid) -> Result<(), MessageQueueError> {
        let (_, mut message) = self
            .in_flight
            .remove(message_id)
            .ok_or(MessageQueueError::UnknownMessage(*message_id))?;

        message.retry_count += 1;
        if message.retry_count >= message.max_retries {
            return Err(MessageQueueError::RetriesExhausted {
                id: message.id,
                attempts: message.retry_count,
            });
        }
        self.publish(message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn test_in_memory_queue() {
        let queue = InMemoryMessageQueue::new();
        let message = Message::new(PAYMENT_REPROCESS_TOPIC, serde_json::json!({"payment_id": "1"}));

        assert!(queue.publish(message.clone()).await.is_ok());
        assert_eq!(queue.pending(PAYMENT_REPROCESS_TOPIC).await, 1);

        let received = queue.subscribe(PAYMENT_REPROCESS_TOPIC).await.unwrap().unwrap();
        assert_eq!(received.id, message.id);
        assert!(queue.subscribe(PAYMENT_REPROCESS_TOPIC).await.unwrap().is_none());

        queue.ack(&received.id).await.unwrap();
        assert_matches!(
            queue.ack(&received.id).await,
            Err(MessageQueueError::UnknownMessage(_))
        );
    }

    #[tokio::test]
    async fn nack_requeues_until_retries_are_exhausted() {
        let queue = InMemoryMessageQueue::new();
        let message = Message::new("t", serde_json::json!({})).with_max_retries(2);
        queue.publish(message).await.unwrap();

        let first = queue.subscribe("t").await.unwrap().unwrap();
        queue.nack(&first.id).await.unwrap();

        let second = queue.subscribe("t").await.unwrap().unwrap();
        assert_eq!(second.retry_count, 1);
        assert_matches!(
            queue.nack(&second.id).await,
            Err(MessageQueueError::RetriesExhausted { attempts: 2, .. })
        );
        assert_eq!(queue.pending("t").await, 0);
    }

    #[tokio::test]
    async fn full_queue_rejects_publish() {
        let queue = InMemoryMessageQueue::with_max_size(1);
        queue.publish(Message::new("t", serde_json::json!(1))).await.unwrap();
        assert_matches!(
            queue.publish(Message::new("t", serde_json::json!(2))).await,
            Err(MessageQueueError::QueueFull)
        );
    }
}
