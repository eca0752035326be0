//! In-memory job queue implementations, meant to imitate a clustered broker for test purposes.
//!
//! See [`MockBroker`] for an entry point to the mock system.

use crate::{
    clock::SystemClock,
    config::{ConfigError, ConsumerConfig},
    consumer::AcknowledgeableMessage,
    tracking::{NodePrefix, TrackedStream},
    Headers, MessageId, Queue, ValidatedMessage,
};
use async_channel as mpmc;
use bytes::Bytes;
use futures_util::stream::{self, StreamExt};
use parking_lot::Mutex;
use std::{
    collections::BTreeMap,
    error::Error as StdError,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    task::{Context, Poll},
    time::SystemTime,
};
use tracing::debug;

/// Errors originating from mock consumer operations
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct Error {
    /// The underlying source of the error
    pub cause: Box<dyn StdError + Send + Sync>,
}

#[derive(Debug, Clone)]
struct Channel<T> {
    sender: mpmc::Sender<T>,
    receiver: mpmc::Receiver<T>,
    acked: Arc<AtomicUsize>,
}

impl<T> Channel<T> {
    fn new() -> Self {
        let (sender, receiver) = mpmc::unbounded();
        Channel {
            sender,
            receiver,
            acked: Arc::new(AtomicUsize::new(0)),
        }
    }
}

type Queues = BTreeMap<Queue, Channel<ValidatedMessage>>;

/// An in-memory broker.
///
/// Jobs are added through one of the broker's named [nodes](MockBroker::node), which stamps the
/// node's name into each job's ID the way a clustered broker does. Consumers for a queue are
/// created with [`new_consumer`](MockBroker::new_consumer); consumers of the same queue take jobs
/// on a first-polled-first-served basis, regardless of which node added them.
///
/// This broker can be cloned; all clones share the same queues.
#[derive(Debug, Clone)]
pub struct MockBroker {
    queues: Arc<Mutex<Queues>>,
    next_sequence: Arc<AtomicU64>,
}

impl MockBroker {
    /// Create a new `MockBroker`
    pub fn new() -> Self {
        MockBroker {
            queues: Arc::new(Mutex::new(BTreeMap::new())),
            next_sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    /// A handle for adding jobs through the node with the given name.
    ///
    /// Node names should not contain `-`, which separates the segments of job IDs.
    pub fn node(&self, name: impl Into<String>) -> MockNode {
        MockNode {
            broker: self.clone(),
            name: name.into(),
        }
    }

    /// Create a new consumer which will receive jobs added to the given queue by any node
    pub fn new_consumer(&self, queue: impl Into<Queue>) -> MockConsumer {
        let channel = self.channel(queue.into());
        MockConsumer {
            queue_messages: channel.receiver,
            queue_resend: channel.sender,
            acked: channel.acked,
        }
    }

    /// Create a consumer from the given configuration, counting message sources if the
    /// configuration enables it.
    pub fn consumer_from_config(
        &self,
        config: &ConsumerConfig,
    ) -> Result<TrackedStream<MockConsumer, NodePrefix, SystemClock>, ConfigError> {
        config.validate()?;
        let tracker = config.tracking.build_tracker()?;
        Ok(crate::Consumer::track_sources(
            self.new_consumer(config.queue.clone()),
            tracker,
        ))
    }

    /// The number of jobs acknowledged on the given queue so far
    pub fn acked(&self, queue: impl Into<Queue>) -> usize {
        let queue: Queue = queue.into();
        self.queues
            .lock()
            .get(&queue)
            .map_or(0, |channel| channel.acked.load(Ordering::Relaxed))
    }

    /// The number of jobs waiting in the given queue
    pub fn pending(&self, queue: impl Into<Queue>) -> usize {
        let queue: Queue = queue.into();
        self.queues
            .lock()
            .get(&queue)
            .map_or(0, |channel| channel.receiver.len())
    }

    fn channel(&self, queue: Queue) -> Channel<ValidatedMessage> {
        self.queues
            .lock()
            .entry(queue)
            .or_insert_with(Channel::new)
            .clone()
    }
}

impl Default for MockBroker {
    fn default() -> Self {
        Self::new()
    }
}

/// A node of a [`MockBroker`], through which jobs are added.
#[derive(Debug, Clone)]
pub struct MockNode {
    broker: MockBroker,
    name: String,
}

impl MockNode {
    /// The name of this node, as it appears in the IDs of its jobs
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add a job to the given queue, returning its ID
    pub fn add_job(&self, queue: impl Into<Queue>, data: impl Into<Bytes>) -> MessageId {
        self.add_job_with_headers(queue, Headers::new(), data)
    }

    /// Add a job with custom headers to the given queue, returning its ID
    pub fn add_job_with_headers(
        &self,
        queue: impl Into<Queue>,
        headers: Headers,
        data: impl Into<Bytes>,
    ) -> MessageId {
        let sequence = self.broker.next_sequence.fetch_add(1, Ordering::Relaxed);
        let id = MessageId::from(format!("D-{}-{:016x}", self.name, sequence));
        let message = ValidatedMessage::new(id.clone(), SystemTime::now(), headers, data);

        // the broker holds a receiver for every queue, so the channel can never close
        match self.broker.channel(queue.into()).sender.try_send(message) {
            Ok(()) => {}
            Err(mpmc::TrySendError::Closed(_)) => {
                unreachable!("broker queues are never closed")
            }
            Err(mpmc::TrySendError::Full(_)) => {
                unreachable!("unbounded channel should never be full")
            }
        }
        id
    }
}

/// A consumer for jobs from a particular queue of a [`MockBroker`]
#[derive(Debug, Clone)]
pub struct MockConsumer {
    // channel receiver to get jobs from the queue
    queue_messages: mpmc::Receiver<ValidatedMessage>,

    // channel sender to resend jobs to the queue on nack
    queue_resend: mpmc::Sender<ValidatedMessage>,

    acked: Arc<AtomicUsize>,
}

impl crate::Consumer for MockConsumer {
    type AckToken = MockAckToken;
    type Error = Error;
    type Stream = Self;

    fn stream(self) -> Self::Stream {
        self
    }
}

impl stream::Stream for MockConsumer {
    type Item = Result<AcknowledgeableMessage<MockAckToken, ValidatedMessage>, Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context) -> Poll<Option<Self::Item>> {
        self.queue_messages
            .poll_next_unpin(cx)
            .map(|opt_message| {
                opt_message.map(|message| {
                    Ok(AcknowledgeableMessage {
                        ack_token: MockAckToken {
                            message: message.clone(),
                            queue_resend: self.queue_resend.clone(),
                            acked: Arc::clone(&self.acked),
                        },
                        message,
                    })
                })
            })
    }
}

/// An acknowledge token associated with a particular job from a [`MockConsumer`].
///
/// When `nack` is called for a particular job's token, that job will be re-queued for consumers
/// of the corresponding queue. Jobs otherwise do not have any retry timeout, so a job is only
/// re-sent to consumers if it is explicitly nack'ed; `ack` only counts the job as done, and
/// `modify_deadline` has no effect
#[derive(Debug)]
pub struct MockAckToken {
    message: ValidatedMessage,
    queue_resend: mpmc::Sender<ValidatedMessage>,
    acked: Arc<AtomicUsize>,
}

#[async_trait::async_trait]
impl crate::consumer::AcknowledgeToken for MockAckToken {
    type AckError = Error;
    type NackError = Error;
    type ModifyError = Error;

    async fn ack(self) -> Result<(), Self::AckError> {
        self.acked.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn nack(self) -> Result<(), Self::NackError> {
        debug!(id = %self.message.id(), "re-queueing nacked job");
        self.queue_resend
            .send(self.message)
            .await
            .map_err(|mpmc::SendError(_message)| Error {
                cause: "Could not nack job because the queue has been closed".into(),
            })
    }

    async fn modify_deadline(&mut self, _seconds: u32) -> Result<(), Self::ModifyError> {
        // currently does nothing
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Consumer, TrackingConfig};

    #[test]
    fn job_ids_carry_node_name() {
        let broker = MockBroker::new();
        let first = broker.node("n1").add_job("q", "a");
        let second = broker.node("n2").add_job("q", "b");

        assert_eq!(first.node_prefix(), Some("n1"));
        assert_eq!(second.node_prefix(), Some("n2"));
        assert_ne!(first, second);
        assert_eq!(broker.pending("q"), 2);
    }

    #[tokio::test]
    async fn ack_counts_and_nack_requeues() {
        let broker = MockBroker::new();
        let id = broker.node("n1").add_job("q", "a");
        let mut consumer = broker.new_consumer("q").stream();

        let received = consumer.next().await.unwrap().unwrap();
        assert_eq!(received.id(), &id);
        received.nack().await.unwrap();
        assert_eq!(broker.pending("q"), 1);

        let received = consumer.next().await.unwrap().unwrap();
        assert_eq!(received.id(), &id);
        let message = received.ack().await.unwrap();
        assert_eq!(message.data(), &Bytes::from("a"));
        assert_eq!(broker.acked("q"), 1);
        assert_eq!(broker.pending("q"), 0);
    }

    #[tokio::test]
    async fn queues_are_isolated() {
        let broker = MockBroker::new();
        broker.node("n1").add_job("other", "x");
        let id = broker.node("n1").add_job("q", "y");

        let mut consumer = broker.new_consumer("q");
        let received = consumer.next().await.unwrap().unwrap();
        assert_eq!(received.id(), &id);
        received.ack().await.unwrap();

        assert_eq!(broker.pending("other"), 1);
        assert_eq!(broker.acked("other"), 0);
    }

    #[test]
    fn consumer_from_config_honours_toggle() {
        let broker = MockBroker::new();

        let off = broker
            .consumer_from_config(&ConsumerConfig::new("q"))
            .unwrap();
        assert!(!off.tracker().is_enabled());

        let on = broker
            .consumer_from_config(
                &ConsumerConfig::new("q").tracking(TrackingConfig::default().enabled(true)),
            )
            .unwrap();
        assert!(on.tracker().is_enabled());

        assert!(matches!(
            broker.consumer_from_config(&ConsumerConfig::default()),
            Err(ConfigError::EmptyQueue)
        ));
    }
}
