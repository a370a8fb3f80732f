//! Ping-pong harness for Kafka-compatible brokers.
//!
//! Three roles exercise a broker's producer/consumer path end to end:
//!
//! - the ping producer publishes `"ping"` to `pings` on a fixed interval,
//! - the relay consumes `pings` and answers each one with `"pong"` on `pongs`,
//! - the drain consumes `pongs` and only logs.
//!
//! Each role is written against the [`Broker`] interface, which has one
//! implementation per client library (`rdkafka` and the pure-Rust `kafka`
//! crate) plus an in-process [`MemoryBroker`]. A [`ShutdownController`]
//! releases every handle a process owns when it is interrupted.
//!
//! # Example
//!
//! ```no_run
//! use pingpong::{connect, roles, shutdown, ClientKind, ConnectionConfig, ProducerSettings, ShutdownController};
//!
//! #[tokio::main]
//! async fn main() {
//!     let broker = connect(ClientKind::Librdkafka, ConnectionConfig::new(["localhost:9092"]));
//!     let controller = ShutdownController::new();
//!
//!     let role = roles::run_ping_producer(broker, controller.clone(), ProducerSettings::default());
//!     let code = shutdown::supervise(controller, role, tokio::signal::ctrl_c()).await;
//!     std::process::exit(code);
//! }
//! ```

pub mod broker;
pub mod config;
mod error;
mod message;
pub mod partition;
pub mod roles;
pub mod shutdown;

pub use broker::{connect, Broker, MemoryBroker, MessageStream, Publisher, Subscription};
pub use config::{ClientKind, ConnectionConfig, DrainSettings, ProducerSettings, RelaySettings};
pub use error::{HarnessError, Result};
pub use message::{Delivery, Message, Record};
pub use partition::PartitionSelector;
pub use shutdown::ShutdownController;

/// Re-export the event definitions for convenience
pub use pingpong_messages::{Event, Ping, Pong};
