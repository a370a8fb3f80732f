//! Connection and role settings.

use crate::partition::PartitionSelector;
use pingpong_messages::{Event, Pong};
use std::fmt;
use std::time::Duration;

/// Default consumer group for the ping side (relay).
pub const PING_GROUP: &str = "ping-consumer";

/// Default consumer group for the pong side (drain).
pub const PONG_GROUP: &str = "pong-consumer";

/// Default client identifier sent to the broker.
pub const DEFAULT_CLIENT_ID: &str = "ping-test";

/// Which client library talks to the broker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum ClientKind {
    /// Pure-Rust Kafka protocol client.
    #[default]
    Native,
    /// librdkafka through `rdkafka`.
    Librdkafka,
}

impl fmt::Display for ClientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientKind::Native => f.write_str("native"),
            ClientKind::Librdkafka => f.write_str("librdkafka"),
        }
    }
}

/// How to reach the broker cluster.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Bootstrap addresses, `host:port`.
    pub brokers: Vec<String>,

    /// Client identifier reported to the broker.
    pub client_id: String,

    /// Upper bound on a single fetch wait for polling clients.
    ///
    /// The native consumer re-checks for shutdown between polls, so this is
    /// also how long an interrupt can take to reach it.
    pub poll_interval: Duration,

    /// How long a publish may wait for the broker's acknowledgement.
    pub delivery_timeout: Duration,

    /// How long the connectivity probe waits for metadata.
    pub probe_timeout: Duration,
}

impl ConnectionConfig {
    pub fn new<I, S>(brokers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            brokers: brokers.into_iter().map(Into::into).collect(),
            client_id: DEFAULT_CLIENT_ID.to_string(),
            poll_interval: Duration::from_millis(250),
            delivery_timeout: Duration::from_secs(5),
            probe_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_delivery_timeout(mut self, timeout: Duration) -> Self {
        self.delivery_timeout = timeout;
        self
    }

    /// Sets how long construction waits for cluster metadata before failing.
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Bootstrap addresses in librdkafka's comma-separated form.
    pub fn bootstrap_servers(&self) -> String {
        self.brokers.join(",")
    }
}

/// Settings for the ping producer loop.
#[derive(Debug, Clone)]
pub struct ProducerSettings {
    pub interval: Duration,
    pub partitions: PartitionSelector,
    /// Stop after this many pings. `None` runs until interrupted.
    pub max_messages: Option<u64>,
}

impl Default for ProducerSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(500),
            partitions: PartitionSelector::Default,
            max_messages: None,
        }
    }
}

impl ProducerSettings {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_partitions(mut self, partitions: PartitionSelector) -> Self {
        self.partitions = partitions;
        self
    }

    pub fn with_max_messages(mut self, max: Option<u64>) -> Self {
        self.max_messages = max;
        self
    }
}

/// Settings for the ping → pong relay.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub group_id: String,
    /// Pause after each forwarded pong.
    pub delay: Duration,
    pub partitions: PartitionSelector,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            group_id: PING_GROUP.to_string(),
            delay: Duration::from_millis(500),
            partitions: PartitionSelector::Default,
        }
    }
}

impl RelaySettings {
    pub fn with_group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = group_id.into();
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_partitions(mut self, partitions: PartitionSelector) -> Self {
        self.partitions = partitions;
        self
    }
}

/// Settings for a consumer that only logs what it receives.
#[derive(Debug, Clone)]
pub struct DrainSettings {
    pub topic: String,
    pub group_id: String,
    pub delay: Duration,
}

impl Default for DrainSettings {
    fn default() -> Self {
        Self {
            topic: Pong::TOPIC.to_string(),
            group_id: PONG_GROUP.to_string(),
            delay: Duration::ZERO,
        }
    }
}

impl DrainSettings {
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    pub fn with_group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = group_id.into();
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}
