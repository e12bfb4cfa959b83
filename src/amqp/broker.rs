//! Message broker abstraction and the in-memory implementation.

use std::sync::Arc;

use axum::body::Bytes;
use dashmap::DashMap;
use futures_util::future::BoxFuture;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use crate::proxy::ProxyError;

/// Binding key matching every routing key.
pub const WILDCARD: &str = "#";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("queue '{0}' is not declared")]
    UnknownQueue(String),

    #[error("queue '{0}' is full")]
    Full(String),

    #[error("queue '{0}' is closed")]
    Closed(String),

    #[error("invalid queue declaration: {0}")]
    InvalidDeclaration(String),
}

impl From<QueueError> for ProxyError {
    fn from(e: QueueError) -> Self {
        ProxyError::Queue(e.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct Message {
    pub id: Uuid,
    pub routing_key: String,
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl Message {
    pub fn new(routing_key: impl Into<String>, content_type: Option<String>, body: Bytes) -> Self {
        Self {
            id: Uuid::new_v4(),
            routing_key: routing_key.into(),
            content_type,
            body,
        }
    }
}

/// Exchange/queue broker used by the message-queue backends.
pub trait MessageBroker: Send + Sync {
    /// Declare a queue and bind it to `exchange` for each routing key.
    /// Declaring an existing queue adds bindings and keeps its messages.
    fn declare_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_keys: &[String],
        capacity: usize,
    ) -> Result<(), QueueError>;

    /// Route a message to every queue bound to `exchange` with a matching
    /// key. Returns how many queues received it.
    fn publish<'a>(
        &'a self,
        exchange: &'a str,
        message: Message,
    ) -> BoxFuture<'a, Result<usize, QueueError>>;

    /// Wait for the next message on `queue`.
    fn consume<'a>(&'a self, queue: &'a str) -> BoxFuture<'a, Result<Message, QueueError>>;
}

pub type BrokerRef = Arc<dyn MessageBroker>;

struct QueueHandle {
    sender: mpsc::Sender<Message>,
    receiver: Mutex<mpsc::Receiver<Message>>,
}

#[derive(Debug, Clone)]
struct Binding {
    routing_key: String,
    queue: String,
}

impl Binding {
    fn matches(&self, routing_key: &str) -> bool {
        self.routing_key == WILDCARD || self.routing_key == routing_key
    }
}

/// Process-local broker backed by bounded tokio channels.
#[derive(Default)]
pub struct InMemoryBroker {
    queues: DashMap<String, Arc<QueueHandle>>,
    bindings: DashMap<String, Vec<Binding>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages waiting on `queue`, or `None` if it is not declared.
    pub fn depth(&self, queue: &str) -> Option<usize> {
        self.queues
            .get(queue)
            .map(|q| q.sender.max_capacity() - q.sender.capacity())
    }
}

impl MessageBroker for InMemoryBroker {
    fn declare_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_keys: &[String],
        capacity: usize,
    ) -> Result<(), QueueError> {
        if queue.is_empty() {
            return Err(QueueError::InvalidDeclaration("queue name is empty".into()));
        }
        if capacity == 0 {
            return Err(QueueError::InvalidDeclaration(format!(
                "queue '{queue}' has zero capacity"
            )));
        }

        self.queues.entry(queue.to_string()).or_insert_with(|| {
            let (sender, receiver) = mpsc::channel(capacity);
            Arc::new(QueueHandle {
                sender,
                receiver: Mutex::new(receiver),
            })
        });

        let mut bindings = self.bindings.entry(exchange.to_string()).or_default();
        for key in routing_keys {
            let binding = Binding {
                routing_key: key.clone(),
                queue: queue.to_string(),
            };
            if !bindings
                .iter()
                .any(|b| b.routing_key == binding.routing_key && b.queue == binding.queue)
            {
                bindings.push(binding);
            }
        }

        tracing::debug!(queue, exchange, ?routing_keys, "Queue declared");
        Ok(())
    }

    fn publish<'a>(
        &'a self,
        exchange: &'a str,
        message: Message,
    ) -> BoxFuture<'a, Result<usize, QueueError>> {
        Box::pin(async move {
            let mut targets: Vec<String> = self
                .bindings
                .get(exchange)
                .map(|bindings| {
                    bindings
                        .iter()
                        .filter(|b| b.matches(&message.routing_key))
                        .map(|b| b.queue.clone())
                        .collect()
                })
                .unwrap_or_default();
            targets.sort();
            targets.dedup();

            let handles: Vec<(String, Arc<QueueHandle>)> = targets
                .into_iter()
                .filter_map(|queue| {
                    let handle = self.queues.get(&queue).map(|q| q.value().clone())?;
                    Some((queue, handle))
                })
                .collect();

            // Reserve a slot in every queue first so a full queue rejects
            // the message everywhere.
            let permits = handles
                .iter()
                .map(|(queue, handle)| {
                    handle.sender.try_reserve().map_err(|e| match e {
                        mpsc::error::TrySendError::Full(()) => QueueError::Full(queue.clone()),
                        mpsc::error::TrySendError::Closed(()) => QueueError::Closed(queue.clone()),
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;

            let delivered = permits.len();
            for permit in permits {
                permit.send(message.clone());
            }

            if delivered == 0 {
                tracing::debug!(
                    exchange,
                    routing_key = %message.routing_key,
                    "Message unroutable, dropped"
                );
            }
            Ok(delivered)
        })
    }

    fn consume<'a>(&'a self, queue: &'a str) -> BoxFuture<'a, Result<Message, QueueError>> {
        Box::pin(async move {
            let handle = self
                .queues
                .get(queue)
                .map(|q| q.value().clone())
                .ok_or_else(|| QueueError::UnknownQueue(queue.to_string()))?;
            let mut receiver = handle.receiver.lock().await;
            receiver
                .recv()
                .await
                .ok_or_else(|| QueueError::Closed(queue.to_string()))
        })
    }
}
