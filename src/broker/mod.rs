//! Message broker abstraction and in-process implementation.
//!
//! The pipeline talks to its broker through the [`MessageBroker`] trait:
//! durable exchange/queue/binding declarations, `publish`, and a blocking
//! receive with manual acknowledge/reject. Delivery is at-least-once: a
//! delivery that is neither acknowledged nor rejected (consumer crash, or
//! an explicit requeue after a transient failure) goes back to the front
//! of its queue and is delivered again.
//!
//! [`InProcessBroker`] implements the trait on tokio primitives for
//! single-process deployments and tests. The worker and orchestrator are
//! generic over the trait, so a networked broker can be slotted in
//! without touching pipeline logic.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::error::{PipelineError, Result};

/// Broker interface used by the entry point and stage workers.
///
/// Declarations are idempotent. `publish` routes a payload through an
/// exchange by routing key; `receive` resolves when a message is
/// available on the queue and hands back a [`Delivery`] that must be
/// settled with [`Delivery::ack`] or [`Delivery::reject`].
pub trait MessageBroker: Send + Sync {
    /// Declare a direct exchange. Idempotent.
    fn declare_exchange(&self, name: &str) -> Result<()>;

    /// Declare a queue. Idempotent.
    fn declare_queue(&self, name: &str) -> Result<()>;

    /// Bind a queue to an exchange under a routing key. Idempotent.
    fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<()>;

    /// Publish a payload to all queues bound to `(exchange, routing_key)`.
    ///
    /// A payload with no matching binding is dropped with a warning,
    /// matching direct-exchange semantics.
    fn publish(&self, exchange: &str, routing_key: &str, payload: &[u8]) -> Result<()>;

    /// Wait for the next message on a queue.
    fn receive(&self, queue: &str) -> impl Future<Output = Result<Delivery>> + Send;
}

/// One queue: ready messages plus a wakeup for blocked consumers.
#[derive(Debug)]
struct QueueInner {
    name: String,
    ready: Mutex<VecDeque<Vec<u8>>>,
    notify: Notify,
}

impl QueueInner {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ready: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    fn push_back(&self, payload: Vec<u8>) {
        self.ready.lock().push_back(payload);
        self.notify.notify_one();
    }

    /// Requeued messages go to the front so a redelivery is seen before
    /// anything published later.
    fn push_front(&self, payload: Vec<u8>) {
        self.ready.lock().push_front(payload);
        self.notify.notify_one();
    }

    fn pop_front(&self) -> Option<Vec<u8>> {
        self.ready.lock().pop_front()
    }

    fn len(&self) -> usize {
        self.ready.lock().len()
    }
}

/// A single received message awaiting acknowledgement.
///
/// Dropping a delivery without settling it requeues the message, which
/// is how a consumer crash between receive and ack turns into broker
/// redelivery.
#[derive(Debug)]
pub struct Delivery {
    payload: Vec<u8>,
    queue: Arc<QueueInner>,
    settled: bool,
}

impl Delivery {
    fn new(payload: Vec<u8>, queue: Arc<QueueInner>) -> Self {
        Self {
            payload,
            queue,
            settled: false,
        }
    }

    /// The raw message payload.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Name of the queue this message was delivered from.
    #[must_use]
    pub fn queue_name(&self) -> &str {
        &self.queue.name
    }

    /// Acknowledge the message; it will not be delivered again.
    pub fn ack(mut self) {
        self.settled = true;
    }

    /// Reject the message. With `requeue`, it is redelivered (transient
    /// failure); without, it is discarded (poison message).
    pub fn reject(mut self, requeue: bool) {
        self.settled = true;
        if requeue {
            let payload = std::mem::take(&mut self.payload);
            self.queue.push_front(payload);
        } else {
            debug!(queue = %self.queue.name, "discarding rejected message");
        }
    }
}

impl Drop for Delivery {
    fn drop(&mut self) {
        if !self.settled {
            let payload = std::mem::take(&mut self.payload);
            warn!(queue = %self.queue.name, "unsettled delivery dropped, requeueing");
            self.queue.push_front(payload);
        }
    }
}

/// In-process broker backed by tokio primitives.
///
/// Bindings follow direct-exchange routing: a published payload is
/// copied to every queue bound to the `(exchange, routing_key)` pair.
#[derive(Debug, Default)]
pub struct InProcessBroker {
    /// exchange -> routing key -> bound queue names
    bindings: Mutex<HashMap<String, HashMap<String, Vec<String>>>>,
    queues: Mutex<HashMap<String, Arc<QueueInner>>>,
}

static_assertions::assert_impl_all!(InProcessBroker: Send, Sync);
static_assertions::assert_impl_all!(Delivery: Send);

impl InProcessBroker {
    /// Create an empty broker with no topology declared.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn queue(&self, name: &str) -> Result<Arc<QueueInner>> {
        self.queues.lock().get(name).cloned().ok_or_else(|| {
            PipelineError::Infrastructure(format!("queue '{name}' is not declared"))
        })
    }

    /// Number of ready (undelivered) messages on a queue. Test/ops hook.
    pub fn queue_depth(&self, name: &str) -> Result<usize> {
        Ok(self.queue(name)?.len())
    }
}

impl MessageBroker for InProcessBroker {
    fn declare_exchange(&self, name: &str) -> Result<()> {
        self.bindings.lock().entry(name.to_string()).or_default();
        Ok(())
    }

    fn declare_queue(&self, name: &str) -> Result<()> {
        self.queues
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(QueueInner::new(name)));
        Ok(())
    }

    fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<()> {
        if !self.queues.lock().contains_key(queue) {
            return Err(PipelineError::Infrastructure(format!(
                "cannot bind undeclared queue '{queue}'"
            )));
        }
        let mut bindings = self.bindings.lock();
        let exchange_bindings = bindings.get_mut(exchange).ok_or_else(|| {
            PipelineError::Infrastructure(format!("exchange '{exchange}' is not declared"))
        })?;
        let bound = exchange_bindings
            .entry(routing_key.to_string())
            .or_default();
        if !bound.iter().any(|q| q == queue) {
            bound.push(queue.to_string());
        }
        Ok(())
    }

    fn publish(&self, exchange: &str, routing_key: &str, payload: &[u8]) -> Result<()> {
        let targets: Vec<String> = {
            let bindings = self.bindings.lock();
            let exchange_bindings = bindings.get(exchange).ok_or_else(|| {
                PipelineError::Infrastructure(format!("exchange '{exchange}' is not declared"))
            })?;
            exchange_bindings
                .get(routing_key)
                .cloned()
                .unwrap_or_default()
        };

        if targets.is_empty() {
            warn!(exchange, routing_key, "no queue bound, dropping message");
            return Ok(());
        }

        for name in targets {
            let queue = self.queue(&name)?;
            queue.push_back(payload.to_vec());
        }
        Ok(())
    }

    fn receive(&self, queue: &str) -> impl Future<Output = Result<Delivery>> + Send {
        let queue = self.queue(queue);
        async move {
            let queue = queue?;
            loop {
                if let Some(payload) = queue.pop_front() {
                    return Ok(Delivery::new(payload, queue.clone()));
                }
                queue.notify.notified().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn broker_with_topology() -> InProcessBroker {
        let broker = InProcessBroker::new();
        broker.declare_exchange("ex").unwrap();
        broker.declare_queue("q1").unwrap();
        broker.bind_queue("q1", "ex", "k1").unwrap();
        broker
    }

    #[tokio::test]
    async fn test_publish_and_receive() {
        let broker = broker_with_topology();
        broker.publish("ex", "k1", b"hello").unwrap();

        let delivery = broker.receive("q1").await.unwrap();
        assert_eq!(delivery.payload(), b"hello");
        assert_eq!(delivery.queue_name(), "q1");
        delivery.ack();

        assert_eq!(broker.queue_depth("q1").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unsettled_delivery_is_redelivered() {
        let broker = broker_with_topology();
        broker.publish("ex", "k1", b"msg").unwrap();

        // Simulate a consumer crash between receive and ack.
        {
            let delivery = broker.receive("q1").await.unwrap();
            assert_eq!(delivery.payload(), b"msg");
            drop(delivery);
        }

        let redelivered = broker.receive("q1").await.unwrap();
        assert_eq!(redelivered.payload(), b"msg");
        redelivered.ack();
    }

    #[tokio::test]
    async fn test_reject_with_requeue_redelivers_first() {
        let broker = broker_with_topology();
        broker.publish("ex", "k1", b"first").unwrap();
        broker.publish("ex", "k1", b"second").unwrap();

        let delivery = broker.receive("q1").await.unwrap();
        assert_eq!(delivery.payload(), b"first");
        delivery.reject(true);

        // Requeued message comes back before anything published later.
        let redelivered = broker.receive("q1").await.unwrap();
        assert_eq!(redelivered.payload(), b"first");
        redelivered.ack();

        let next = broker.receive("q1").await.unwrap();
        assert_eq!(next.payload(), b"second");
        next.ack();
    }

    #[tokio::test]
    async fn test_reject_without_requeue_discards() {
        let broker = broker_with_topology();
        broker.publish("ex", "k1", b"poison").unwrap();

        let delivery = broker.receive("q1").await.unwrap();
        delivery.reject(false);

        assert_eq!(broker.queue_depth("q1").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_receive_waits_for_publish() {
        let broker = Arc::new(broker_with_topology());

        let consumer = {
            let broker = broker.clone();
            tokio::spawn(async move {
                let delivery = broker.receive("q1").await.unwrap();
                let payload = delivery.payload().to_vec();
                delivery.ack();
                payload
            })
        };

        // Give the consumer a chance to block first.
        tokio::task::yield_now().await;
        broker.publish("ex", "k1", b"late").unwrap();

        assert_eq!(consumer.await.unwrap(), b"late");
    }

    #[test]
    fn test_unroutable_message_is_dropped() {
        let broker = broker_with_topology();
        // No binding for this routing key; publish succeeds but nothing lands.
        broker.publish("ex", "unbound", b"lost").unwrap();
        assert_eq!(broker.queue_depth("q1").unwrap(), 0);
    }

    #[test]
    fn test_undeclared_exchange_errors() {
        let broker = InProcessBroker::new();
        let err = broker.publish("ghost", "k", b"x").unwrap_err();
        assert_eq!(err.error_code(), "INFRASTRUCTURE_ERROR");
    }

    #[tokio::test]
    async fn test_undeclared_queue_errors() {
        let broker = InProcessBroker::new();
        let err = broker.receive("ghost").await.unwrap_err();
        assert_eq!(err.error_code(), "INFRASTRUCTURE_ERROR");
    }

    #[test]
    fn test_declarations_are_idempotent() {
        let broker = broker_with_topology();
        broker.declare_exchange("ex").unwrap();
        broker.declare_queue("q1").unwrap();
        broker.bind_queue("q1", "ex", "k1").unwrap();

        broker.publish("ex", "k1", b"once").unwrap();
        // A duplicate binding must not fan the message out twice.
        assert_eq!(broker.queue_depth("q1").unwrap(), 1);
    }
}
