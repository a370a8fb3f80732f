//! Consumer that only logs what it receives.

use super::pause;
use crate::broker::{Broker, MessageStream};
use crate::config::DrainSettings;
use crate::error::Result;
use crate::shutdown::ShutdownController;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Subscribes to `settings.topic` as a member of `settings.group_id` and logs
/// every message until interrupted. Nothing is published.
///
/// # Arguments
///
/// * `broker` - Client used to create the consumer
/// * `controller` - Shutdown controller that owns the consumer handle
/// * `settings` - Topic, group and pause between messages
///
/// # Errors
///
/// Returns an error if the consumer cannot be created or subscribed.
pub async fn run_drain(
    broker: Arc<dyn Broker>,
    controller: Arc<ShutdownController>,
    settings: DrainSettings,
) -> Result<()> {
    let subscription = broker
        .subscribe(&settings.topic, &settings.group_id, controller.token())
        .await?;
    controller
        .registry()
        .register_consumer(Arc::clone(&subscription.handle));

    info!("Starting consumer...");
    let mut stream = subscription.stream;
    let received = drain(&mut stream, settings.delay).await;
    info!("Drained {} messages from {}", received, settings.topic);
    Ok(())
}

/// Logs every message until the stream ends. Returns how many were received.
pub async fn drain(stream: &mut MessageStream, delay: Duration) -> u64 {
    let cancel = stream.cancellation().clone();
    let mut received: u64 = 0;

    while let Some(message) = stream.next().await {
        info!(
            topic = %message.topic,
            partition = message.partition,
            offset = message.offset,
            key = message.key_lossy().as_deref().unwrap_or("(null)"),
            value = %message.value_lossy(),
            "Message received"
        );
        received += 1;

        if pause(delay, &cancel).await {
            break;
        }
    }

    received
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;
    use crate::message::Message;
    use tokio_util::sync::CancellationToken;

    fn pong(value: &[u8]) -> Message {
        Message {
            topic: "pongs".to_string(),
            partition: 0,
            offset: -1,
            key: None,
            value: value.to_vec(),
        }
    }

    #[tokio::test]
    async fn test_empty_messages_are_not_counted() {
        let broker = MemoryBroker::new();
        let shutdown = CancellationToken::new();
        broker.inject(pong(b""));
        broker.inject(pong(b""));
        let subscription = broker.subscribe("pongs", "pong-consumer", &shutdown).await.unwrap();

        let mut stream = subscription.stream;
        let drained = tokio::spawn(async move { drain(&mut stream, Duration::ZERO).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();
        assert_eq!(drained.await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_drain_counts_every_message() {
        let broker = MemoryBroker::new();
        let shutdown = CancellationToken::new();
        broker.inject(pong(b"pong"));
        broker.inject(pong(b""));
        broker.inject(pong(b"pong"));
        let subscription = broker.subscribe("pongs", "pong-consumer", &shutdown).await.unwrap();

        let mut stream = subscription.stream;
        let drained = tokio::spawn(async move { drain(&mut stream, Duration::ZERO).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();
        assert_eq!(drained.await.unwrap(), 2);
        assert_eq!(broker.count("pings"), 0);
    }
}
