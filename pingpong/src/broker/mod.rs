//! The broker capability the roles are written against.
//!
//! Two operations make up the whole surface: publish a record, and subscribe a
//! consumer group to a topic. Each client library gets one implementation;
//! the roles never see which one they are running on.

mod librdkafka;
pub mod memory;
mod native;
mod stream;

pub use librdkafka::RdKafkaBroker;
pub use memory::MemoryBroker;
pub use native::NativeBroker;
pub use stream::{ConsumerHandle, MessageStream, Subscription};

use crate::config::{ClientKind, ConnectionConfig};
use crate::error::Result;
use crate::message::{Delivery, Record};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Publishing half of a client.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Submits one record and waits for the broker's acknowledgement.
    async fn publish(&self, record: &Record<'_>) -> Result<Delivery>;

    /// Blocks until every submitted record has been acknowledged.
    async fn flush(&self) -> Result<()>;

    /// Flushes and releases the connection. Later publishes fail.
    async fn close(&self) -> Result<()>;
}

/// Factory for publishers and subscriptions on one broker cluster.
///
/// Construction errors (unreachable broker, bad bootstrap list) surface from
/// these calls, before any role loop starts.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Short name for logs.
    fn kind(&self) -> &'static str;

    /// Creates a producer connected to the cluster.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Connection`](crate::HarnessError::Connection)
    /// if the cluster cannot be reached.
    async fn publisher(&self) -> Result<Arc<dyn Publisher>>;

    /// Joins `group_id` and subscribes to `topic`.
    ///
    /// The returned stream ends when `shutdown` is cancelled or the
    /// subscription's handle is stopped.
    ///
    /// # Arguments
    ///
    /// * `topic` - Topic to consume
    /// * `group_id` - Consumer group to join
    /// * `shutdown` - Parent token; the subscription cancels with it
    ///
    /// # Errors
    ///
    /// Returns an error if the consumer cannot be created or the cluster
    /// cannot be reached.
    async fn subscribe(
        &self,
        topic: &str,
        group_id: &str,
        shutdown: &CancellationToken,
    ) -> Result<Subscription>;
}

/// Builds the broker client for `kind`.
pub fn connect(kind: ClientKind, config: ConnectionConfig) -> Arc<dyn Broker> {
    match kind {
        ClientKind::Native => Arc::new(NativeBroker::new(config)),
        ClientKind::Librdkafka => Arc::new(RdKafkaBroker::new(config)),
    }
}
