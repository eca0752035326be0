//! Counting which node the consumed messages originate from.
//!
//! Brokers made of several nodes hand out jobs from whichever node a client is connected to, but
//! jobs are usually produced unevenly across the cluster. A [`SourceTracker`] observes each
//! received message, counts its source over a rolling window, and reports the currently busiest
//! source through [`preferred_source`](SourceTracker::preferred_source). A client can use this to
//! decide which node to (re)connect to.
//!
//! Tracking is opt-in; see [`TrackingConfig`](crate::TrackingConfig).

use crate::{
    clock::{Clock, SystemClock},
    consumer::AcknowledgeableMessage,
    rolling::RollingCounter,
    DecodableMessage, MessageStream, ValidatedMessage,
};
use futures_util::stream;
use pin_project::pin_project;
use std::{
    fmt,
    hash::Hash,
    pin::Pin,
    task::{Context, Poll},
};
use tracing::debug;

/// Extracts the source a message was received from.
pub trait SourceKey {
    /// The identifier of a source
    type Key: Hash + Eq + Ord + Clone + fmt::Debug;

    /// The source of the given message, or `None` if it can't be determined
    fn source_key(&self, message: &ValidatedMessage) -> Option<Self::Key>;
}

/// Identifies sources by the node segment of each message's ID.
///
/// See [`MessageId::node_prefix`](crate::MessageId::node_prefix).
#[derive(Debug, Default, Clone, Copy)]
pub struct NodePrefix;

impl SourceKey for NodePrefix {
    type Key = String;

    fn source_key(&self, message: &ValidatedMessage) -> Option<String> {
        message.id().node_prefix().map(String::from)
    }
}

impl<F, K> SourceKey for F
where
    F: Fn(&ValidatedMessage) -> Option<K>,
    K: Hash + Eq + Ord + Clone + fmt::Debug,
{
    type Key = K;

    fn source_key(&self, message: &ValidatedMessage) -> Option<K> {
        self(message)
    }
}

/// Counts message sources over a rolling window, if enabled.
///
/// A disabled tracker does nothing when observing messages.
pub struct SourceTracker<X: SourceKey = NodePrefix, C = SystemClock> {
    counter: Option<RollingCounter<X::Key, C>>,
    extractor: X,
    reported: Option<X::Key>,
}

impl<X, C> fmt::Debug for SourceTracker<X, C>
where
    X: SourceKey + fmt::Debug,
    C: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SourceTracker")
            .field("counter", &self.counter)
            .field("extractor", &self.extractor)
            .field("reported", &self.reported)
            .finish()
    }
}

impl<X: SourceKey, C: Clock> SourceTracker<X, C> {
    /// Create a tracker which counts sources with the given counter
    pub fn enabled(extractor: X, counter: RollingCounter<X::Key, C>) -> Self {
        SourceTracker {
            counter: Some(counter),
            extractor,
            reported: None,
        }
    }

    /// Create a tracker which ignores every message
    pub fn disabled(extractor: X) -> Self {
        SourceTracker {
            counter: None,
            extractor,
            reported: None,
        }
    }

    /// Whether this tracker counts anything
    pub fn is_enabled(&self) -> bool {
        self.counter.is_some()
    }

    /// The underlying counter, when enabled
    pub fn counter(&self) -> Option<&RollingCounter<X::Key, C>> {
        self.counter.as_ref()
    }

    /// Count the source of a received message.
    ///
    /// Messages without an identifiable source are ignored.
    pub fn observe(&mut self, message: &ValidatedMessage) {
        if let Some(counter) = &mut self.counter {
            if let Some(key) = self.extractor.source_key(message) {
                counter.add(key);
            }
        }
    }

    /// The source with the most messages within the window, or `None` if tracking is disabled or
    /// nothing was received recently.
    pub fn preferred_source(&mut self) -> Option<X::Key> {
        let current = self.counter.as_mut()?.max();
        if current != self.reported {
            debug!(
                previous = ?self.reported,
                current = ?current,
                "preferred message source changed"
            );
            self.reported = current.clone();
        }
        current
    }
}

/// A consumer stream which counts the source of every message it yields.
///
/// Created by [`Consumer::track_sources`](crate::Consumer::track_sources). Errors from the
/// underlying stream pass through uncounted.
#[pin_project]
pub struct TrackedStream<S, X: SourceKey, C> {
    #[pin]
    stream: S,
    tracker: SourceTracker<X, C>,
}

impl<S, X, C> fmt::Debug for TrackedStream<S, X, C>
where
    S: fmt::Debug,
    X: SourceKey + fmt::Debug,
    C: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TrackedStream")
            .field("stream", &self.stream)
            .field("tracker", &self.tracker)
            .finish()
    }
}

impl<S, X: SourceKey, C: Clock> TrackedStream<S, X, C> {
    pub(crate) fn new(stream: S, tracker: SourceTracker<X, C>) -> Self {
        TrackedStream { stream, tracker }
    }

    /// The tracker counting this stream's messages
    pub fn tracker(&self) -> &SourceTracker<X, C> {
        &self.tracker
    }

    /// Mutable access to the tracker counting this stream's messages
    pub fn tracker_mut(&mut self) -> &mut SourceTracker<X, C> {
        &mut self.tracker
    }

    /// See [`SourceTracker::preferred_source`]
    pub fn preferred_source(&mut self) -> Option<X::Key> {
        self.tracker.preferred_source()
    }

    /// Decode the tracked messages into the given message type.
    ///
    /// The tracker remains reachable through [`MessageStream::get_mut`].
    pub fn consume<M>(self, decoder: M::Decoder) -> MessageStream<Self, M::Decoder, M>
    where
        M: DecodableMessage,
    {
        MessageStream::new(self, decoder)
    }

    /// Destructure into the underlying stream and tracker
    pub fn into_inner(self) -> (S, SourceTracker<X, C>) {
        (self.stream, self.tracker)
    }
}

impl<S, X, C, A, E> stream::Stream for TrackedStream<S, X, C>
where
    S: stream::Stream<Item = Result<AcknowledgeableMessage<A, ValidatedMessage>, E>>,
    X: SourceKey,
    C: Clock,
{
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Option<Self::Item>> {
        let this = self.project();
        let tracker = this.tracker;
        this.stream.poll_next(cx).map(|opt| {
            if let Some(Ok(received)) = &opt {
                tracker.observe(&received.message);
            }
            opt
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.stream.size_hint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{clock::ManualClock, Headers};
    use futures_util::stream::StreamExt;
    use std::time::{Duration, SystemTime};

    fn job(id: &str) -> ValidatedMessage {
        ValidatedMessage::new(id, SystemTime::now(), Headers::new(), "payload")
    }

    fn enabled_tracker(ttl: Duration) -> (SourceTracker<NodePrefix, ManualClock>, ManualClock) {
        let clock = ManualClock::new();
        let counter = RollingCounter::with_clock(ttl, clock.clone()).unwrap();
        (SourceTracker::enabled(NodePrefix, counter), clock)
    }

    #[test]
    fn observe_counts_node_prefix() {
        let (mut tracker, _clock) = enabled_tracker(Duration::from_secs(1));

        tracker.observe(&job("D-aaaa0001-x-1"));
        tracker.observe(&job("D-bbbb0002-x-2"));
        tracker.observe(&job("D-bbbb0002-x-3"));

        assert_eq!(tracker.preferred_source().as_deref(), Some("bbbb0002"));
        let counter = tracker.counter().unwrap();
        assert_eq!(counter.count("aaaa0001"), 1);
        assert_eq!(counter.count("bbbb0002"), 2);
    }

    #[test]
    fn unidentifiable_messages_are_ignored() {
        let (mut tracker, _clock) = enabled_tracker(Duration::from_secs(1));

        tracker.observe(&job("opaque"));
        tracker.observe(&job("D-n1"));
        tracker.observe(&job("D--x"));
        tracker.observe(&job("D-n2-x"));

        assert_eq!(tracker.counter().unwrap().len(), 1);
        assert_eq!(tracker.preferred_source().as_deref(), Some("n2"));
    }

    #[test]
    fn disabled_tracker_counts_nothing() {
        let mut tracker = SourceTracker::<NodePrefix, ManualClock>::disabled(NodePrefix);

        tracker.observe(&job("D-aaaa0001-x-1"));

        assert!(!tracker.is_enabled());
        assert!(tracker.counter().is_none());
        assert_eq!(tracker.preferred_source(), None);
    }

    #[test]
    fn preferred_source_follows_window() {
        let (mut tracker, clock) = enabled_tracker(Duration::from_millis(100));

        tracker.observe(&job("D-old-x-1"));
        tracker.observe(&job("D-old-x-2"));
        assert_eq!(tracker.preferred_source().as_deref(), Some("old"));

        clock.advance(Duration::from_millis(150));
        tracker.observe(&job("D-new-x-3"));
        assert_eq!(tracker.preferred_source().as_deref(), Some("new"));

        clock.advance(Duration::from_millis(150));
        assert_eq!(tracker.preferred_source(), None);
    }

    #[test]
    fn closure_extractor() {
        let by_header = |message: &ValidatedMessage| message.headers().get("origin").cloned();
        let counter =
            RollingCounter::with_clock(Duration::from_secs(1), ManualClock::new()).unwrap();
        let mut tracker = SourceTracker::enabled(by_header, counter);

        let mut message = job("opaque");
        message
            .headers_mut()
            .insert("origin".into(), "eu-west".into());
        tracker.observe(&message);
        tracker.observe(&job("opaque"));

        assert_eq!(tracker.preferred_source().as_deref(), Some("eu-west"));
    }

    #[tokio::test]
    async fn tracked_stream_counts_ok_items_only() {
        let (tracker, _clock) = enabled_tracker(Duration::from_secs(1));
        let items: Vec<Result<AcknowledgeableMessage<(), ValidatedMessage>, &str>> = vec![
            Ok(AcknowledgeableMessage {
                ack_token: (),
                message: job("D-n1-x-1"),
            }),
            Err("transient"),
            Ok(AcknowledgeableMessage {
                ack_token: (),
                message: job("D-n2-x-2"),
            }),
            Ok(AcknowledgeableMessage {
                ack_token: (),
                message: job("D-n2-x-3"),
            }),
        ];

        let mut tracked = TrackedStream::new(stream::iter(items), tracker);
        let mut errors = 0;
        while let Some(item) = tracked.next().await {
            if item.is_err() {
                errors += 1;
            }
        }

        assert_eq!(errors, 1);
        assert_eq!(tracked.preferred_source().as_deref(), Some("n2"));
        let (_stream, tracker) = tracked.into_inner();
        assert_eq!(tracker.counter().unwrap().count("n1"), 1);
    }
}
