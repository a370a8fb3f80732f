//! Event definitions for the ping-pong harness.
//!
//! Every event type is bound to the topic it travels on and to the literal
//! payload it carries. Producers and the relay build their records from these
//! constants, so a pong can never end up on the ping topic.

/// An event the harness publishes.
///
/// # Example
///
/// ```
/// use pingpong_messages::{Event, Ping};
///
/// assert_eq!(Ping::TOPIC, "pings");
/// assert_eq!(Ping::payload(), b"ping");
/// ```
pub trait Event: Send + Sync + 'static {
    /// The topic events of this type are published to.
    const TOPIC: &'static str;

    /// The literal value every event of this type carries.
    const VALUE: &'static str;

    /// Payload bytes as they go on the wire.
    fn payload() -> &'static [u8] {
        Self::VALUE.as_bytes()
    }

    /// Returns true when `value` is this event's payload.
    fn matches(value: &[u8]) -> bool {
        value == Self::payload()
    }
}

/// Published on a fixed interval by the ping producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ping;

impl Event for Ping {
    const TOPIC: &'static str = "pings";
    const VALUE: &'static str = "ping";
}

/// Published by the relay once per received ping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pong;

impl Event for Pong {
    const TOPIC: &'static str = "pongs";
    const VALUE: &'static str = "pong";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topics_are_distinct() {
        assert_eq!(Ping::TOPIC, "pings");
        assert_eq!(Pong::TOPIC, "pongs");
        assert_ne!(Ping::TOPIC, Pong::TOPIC);
    }

    #[test]
    fn test_payload_matching() {
        assert!(Ping::matches(b"ping"));
        assert!(!Ping::matches(b"pong"));
        assert!(Pong::matches(b"pong"));
        assert!(!Pong::matches(b""));
    }
}
