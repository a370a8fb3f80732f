//! Ping producer.

use super::pause;
use crate::broker::{Broker, Publisher};
use crate::config::ProducerSettings;
use crate::error::Result;
use crate::message::Record;
use crate::shutdown::ShutdownController;
use pingpong_messages::Ping;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Connects, registers the producer for shutdown, and publishes pings until
/// interrupted or until `settings.max_messages` is reached.
///
/// # Arguments
///
/// * `broker` - Client used to create the producer
/// * `controller` - Shutdown controller that owns the producer handle
/// * `settings` - Interval, partition range and optional message bound
///
/// # Errors
///
/// Returns an error if the producer cannot be created or the final flush fails.
pub async fn run_ping_producer(
    broker: Arc<dyn Broker>,
    controller: Arc<ShutdownController>,
    settings: ProducerSettings,
) -> Result<()> {
    let publisher = broker.publisher().await?;
    controller
        .registry()
        .register_producer(Arc::clone(&publisher));

    let delivered = produce_pings(publisher.as_ref(), &settings, controller.token()).await;

    if !controller.token().is_cancelled() {
        publisher.flush().await?;
    }
    info!("Producer finished after {} delivered pings", delivered);
    Ok(())
}

/// The send loop. Delivery failures are logged and the loop moves on to the
/// next tick. Returns the number of acknowledged pings.
pub async fn produce_pings(
    publisher: &dyn Publisher,
    settings: &ProducerSettings,
    cancel: &CancellationToken,
) -> u64 {
    info!("Producing =>");

    let mut attempts: u64 = 0;
    let mut delivered: u64 = 0;

    while !cancel.is_cancelled() {
        let record = Record::event::<Ping>().with_partition(settings.partitions.pick());
        match publisher.publish(&record).await {
            Ok(delivery) => {
                delivered += 1;
                debug!(
                    partition = ?delivery.partition,
                    offset = ?delivery.offset,
                    "."
                );
            }
            Err(e) => warn!("Ping delivery failed: {}", e),
        }
        attempts += 1;

        if settings.max_messages.is_some_and(|max| attempts >= max) {
            break;
        }
        if pause(settings.interval, cancel).await {
            break;
        }
    }

    delivered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;
    use crate::partition::PartitionSelector;
    use std::time::Duration;

    #[tokio::test]
    async fn test_bounded_run_publishes_exact_count() {
        let broker = MemoryBroker::new();
        let publisher = broker.publisher().await.unwrap();
        let settings = ProducerSettings::default()
            .with_interval(Duration::from_millis(1))
            .with_max_messages(Some(5));

        let cancel = CancellationToken::new();
        let delivered = produce_pings(publisher.as_ref(), &settings, &cancel).await;

        assert_eq!(delivered, 5);
        assert_eq!(broker.count("pings"), 5);
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_the_loop() {
        let broker = MemoryBroker::new();
        broker.fail_deliveries("pings");
        let publisher = broker.publisher().await.unwrap();
        let settings = ProducerSettings::default()
            .with_interval(Duration::ZERO)
            .with_max_messages(Some(3))
            .with_partitions(PartitionSelector::from_count(Some(3)));

        let cancel = CancellationToken::new();
        let delivered = produce_pings(publisher.as_ref(), &settings, &cancel).await;

        assert_eq!(delivered, 0);
        assert_eq!(broker.count("pings"), 0);
    }

    #[tokio::test]
    async fn test_cancel_stops_unbounded_run() {
        let broker = MemoryBroker::new();
        let publisher = broker.publisher().await.unwrap();
        let settings = ProducerSettings::default().with_interval(Duration::from_secs(60));
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let delivered = tokio::time::timeout(
            Duration::from_secs(2),
            produce_pings(publisher.as_ref(), &settings, &cancel),
        )
        .await
        .expect("producer should stop on cancel");
        assert_eq!(delivered, 1);
    }
}
