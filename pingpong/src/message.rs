//! Outbound records and inbound messages.

use pingpong_messages::Event;
use std::fmt;
use tracing::warn;

/// A record to publish.
///
/// `partition: None` leaves partition assignment to the client library.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Record<'a> {
    pub topic: &'a str,
    pub key: Option<&'a [u8]>,
    pub value: &'a [u8],
    pub partition: Option<i32>,
}

impl<'a> Record<'a> {
    /// Creates a record for `topic` with no key and client-assigned partition.
    ///
    /// # Arguments
    ///
    /// * `topic` - Destination topic
    /// * `value` - Message payload
    pub fn new(topic: &'a str, value: &'a [u8]) -> Self {
        Self {
            topic,
            key: None,
            value,
            partition: None,
        }
    }

    /// Attaches a message key.
    pub fn with_key(mut self, key: &'a [u8]) -> Self {
        self.key = Some(key);
        self
    }

    pub fn with_partition(mut self, partition: Option<i32>) -> Self {
        self.partition = partition;
        self
    }
}

impl Record<'static> {
    /// Builds the record for an event type, bound to that event's topic and payload.
    pub fn event<E: Event>() -> Self {
        Record::new(E::TOPIC, E::payload())
    }
}

/// Broker acknowledgement of a publish.
///
/// The native client does not report where the record landed, so both fields
/// are optional.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    pub partition: Option<i32>,
    pub offset: Option<i64>,
}

/// A message received from a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub value: Vec<u8>,
}

impl Message {
    /// Builds an inbound message from the parts a client library hands back.
    ///
    /// Returns `None` when the value is missing or empty; such messages are
    /// logged and skipped. An empty key is treated as no key.
    pub fn received(
        topic: &str,
        partition: i32,
        offset: i64,
        key: Option<&[u8]>,
        value: Option<&[u8]>,
    ) -> Option<Self> {
        Self {
            topic: topic.to_string(),
            partition,
            offset,
            key: key.map(<[u8]>::to_vec),
            value: value.map(<[u8]>::to_vec).unwrap_or_default(),
        }
        .accept()
    }

    /// Applies the inbound rules to an already owned message. See [`Message::received`].
    pub fn accept(mut self) -> Option<Self> {
        if self.value.is_empty() {
            warn!(
                "Received message with no payload from topic '{}' (partition: {}, offset: {})",
                self.topic, self.partition, self.offset
            );
            return None;
        }
        if self.key.as_ref().is_some_and(Vec::is_empty) {
            self.key = None;
        }
        Some(self)
    }

    pub fn key_lossy(&self) -> Option<String> {
        self.key
            .as_deref()
            .map(|k| String::from_utf8_lossy(k).into_owned())
    }

    pub fn value_lossy(&self) -> String {
        String::from_utf8_lossy(&self.value).into_owned()
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}@{} key={} value={}",
            self.topic,
            self.partition,
            self.offset,
            self.key_lossy().as_deref().unwrap_or("(null)"),
            self.value_lossy()
        )
    }
}
