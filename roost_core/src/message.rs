//! Message related types

use bytes::Bytes;
use std::time::SystemTime;

use crate::{Headers, MessageId};

/// A validated message.
///
/// These are created when pulling jobs from the message service, after the broker's framing has
/// been checked and stripped.
#[derive(Debug, Clone)]
// derive Eq only in tests so that users can't foot-shoot an expensive == over data
#[cfg_attr(test, derive(PartialEq, Eq))]
pub struct ValidatedMessage<M> {
    /// Broker-assigned job identifier.
    pub(crate) id: MessageId,
    /// The timestamp when the job was accepted by the broker.
    pub(crate) timestamp: SystemTime,
    /// Custom message headers.
    ///
    /// This may be used to track request_id, for example.
    pub(crate) headers: Headers,
    /// The message data.
    pub(crate) data: M,
}

impl ValidatedMessage<Bytes> {
    /// Create a new validated message
    pub fn new<I, D>(id: I, timestamp: SystemTime, headers: Headers, data: D) -> Self
    where
        I: Into<MessageId>,
        D: Into<Bytes>,
    {
        Self {
            id: id.into(),
            timestamp,
            headers,
            data: data.into(),
        }
    }
}

impl<M> ValidatedMessage<M> {
    /// Broker-assigned job identifier.
    pub fn id(&self) -> &MessageId {
        &self.id
    }

    /// The timestamp when the job was accepted by the broker.
    pub fn timestamp(&self) -> &SystemTime {
        &self.timestamp
    }

    /// Custom message headers.
    ///
    /// This may be used to track request_id, for example.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Mutable access to the message headers
    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// The message data.
    pub fn data(&self) -> &M {
        &self.data
    }

    /// Destructure this message into just the contained data
    pub fn into_data(self) -> M {
        self.data
    }
}

/// Messages which can be decoded from a [`ValidatedMessage`] stream.
pub trait DecodableMessage {
    /// The error returned when a message fails to decode
    type Error;

    /// The decoder used to decode a validated message
    type Decoder;

    /// Decode the given message, using the given decoder, into its structured type
    fn decode(msg: ValidatedMessage<Bytes>, decoder: &Self::Decoder) -> Result<Self, Self::Error>
    where
        Self: Sized;
}

impl<M> DecodableMessage for ValidatedMessage<M>
where
    M: DecodableMessage,
{
    /// The error returned when a message fails to decode
    type Error = M::Error;

    /// The decoder used to decode a validated message
    type Decoder = M::Decoder;

    /// Decode the given message, using the given decoder, into its structured type
    fn decode(msg: ValidatedMessage<Bytes>, decoder: &Self::Decoder) -> Result<Self, Self::Error>
    where
        Self: Sized,
    {
        let message = M::decode(msg.clone(), decoder)?;
        Ok(Self {
            id: msg.id,
            timestamp: msg.timestamp,
            headers: msg.headers,
            data: message,
        })
    }
}
