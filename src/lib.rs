#![deny(missing_docs, unused_import_braces, unused_qualifications)]
#![warn(
    missing_debug_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unstable_features
)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Roost is a consumer library for clustered job queues, with optional tracking of which broker
//! node the received jobs originate from.
//!
//! Jobs are pulled through a [`Consumer`], which presents them as a stream of
//! [acknowledgeable](AcknowledgeableMessage) messages. In a cluster, a job received from one node
//! has frequently been produced on another; by counting the node prefix of every job ID over a
//! rolling window, a client learns which node currently produces most of its jobs and can prefer
//! connecting to it.
//!
//! Counting happens on every received job, so it is disabled by default and must be switched on
//! through [`TrackingConfig`]. The counter itself is a standalone [`RollingCounter`].
//!
//! # Examples
//!
//! Track the sources of consumed jobs
//!
//! ```
//! # #[cfg(feature = "mock")]
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use futures_util::stream::StreamExt;
//! use roost::{mock::MockBroker, ConsumerConfig, TrackingConfig};
//! use std::time::Duration;
//!
//! let broker = MockBroker::new();
//! broker.node("n1").add_job("emails", "hello");
//! broker.node("n2").add_job("emails", "hi");
//! broker.node("n2").add_job("emails", "hey");
//!
//! let config = ConsumerConfig::new("emails").tracking(
//!     TrackingConfig::default()
//!         .enabled(true)
//!         .ttl(Duration::from_secs(5)),
//! );
//! let mut jobs = broker.consumer_from_config(&config)?;
//!
//! for _ in 0..3 {
//!     let job = jobs.next().await.expect("queue was filled")?;
//!     // normally you'd do work here
//!     job.ack().await?;
//! }
//!
//! assert_eq!(jobs.preferred_source().as_deref(), Some("n2"));
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "mock"))]
//! # fn main() {}
//! ```

pub use roost_core::{message, Headers, MessageId, Queue, ValidatedMessage};

pub mod clock;
mod config;
pub mod consumer;
pub mod rolling;
#[cfg(test)]
mod tests;
pub mod tracking;

mod backends;
pub use backends::*;

pub use config::{ConfigError, ConsumerConfig, TrackingConfig, DEFAULT_TRACKING_TTL};
pub use consumer::{AcknowledgeToken, AcknowledgeableMessage, Consumer, MessageStream};
pub use message::DecodableMessage;
pub use rolling::{InvalidConfiguration, RollingCounter};
pub use tracking::{NodePrefix, SourceKey, SourceTracker, TrackedStream};
