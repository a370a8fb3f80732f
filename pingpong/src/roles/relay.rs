//! Ping consumer that answers every ping with a pong.

use super::pause;
use crate::broker::{Broker, MessageStream, Publisher};
use crate::config::RelaySettings;
use crate::error::Result;
use crate::message::Record;
use crate::shutdown::ShutdownController;
use pingpong_messages::{Event, Ping, Pong};
use std::sync::Arc;
use tracing::{info, warn};

/// Subscribes to pings, opens the pong producer, registers both for
/// shutdown, and relays until interrupted.
///
/// # Errors
///
/// Returns an error if the consumer or the producer cannot be created.
pub async fn run_relay(
    broker: Arc<dyn Broker>,
    controller: Arc<ShutdownController>,
    settings: RelaySettings,
) -> Result<()> {
    let subscription = broker
        .subscribe(Ping::TOPIC, &settings.group_id, controller.token())
        .await?;
    controller
        .registry()
        .register_consumer(Arc::clone(&subscription.handle));

    let publisher = broker.publisher().await?;
    controller
        .registry()
        .register_producer(Arc::clone(&publisher));

    let mut stream = subscription.stream;
    let forwarded = relay_pings(&mut stream, publisher.as_ref(), &settings).await;
    info!("Relay stopped after forwarding {} pongs", forwarded);
    Ok(())
}

/// For each inbound message: log it, publish one pong, wait for the pong to be
/// flushed, then pause. The next message is not read until all of that is
/// done, so a relay never has two pongs in flight.
///
/// Forwarding failures are logged and the message is not retried. Returns the
/// number of pongs delivered.
pub async fn relay_pings(
    stream: &mut MessageStream,
    publisher: &dyn Publisher,
    settings: &RelaySettings,
) -> u64 {
    let cancel = stream.cancellation().clone();
    let mut forwarded: u64 = 0;

    while let Some(message) = stream.next().await {
        info!(
            topic = %message.topic,
            partition = message.partition,
            offset = message.offset,
            value = %message.value_lossy(),
            "Message received"
        );
        if !Ping::matches(&message.value) {
            warn!("Unexpected payload on {}, answering anyway", message.topic);
        }

        let pong = Record::event::<Pong>().with_partition(settings.partitions.pick());
        match forward(publisher, &pong).await {
            Ok(()) => forwarded += 1,
            Err(e) => warn!("Failed to forward pong for offset {}: {}", message.offset, e),
        }

        if pause(settings.delay, &cancel).await {
            break;
        }
    }

    forwarded
}

async fn forward(publisher: &dyn Publisher, pong: &Record<'_>) -> Result<()> {
    publisher.publish(pong).await?;
    publisher.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;
    use crate::message::Message;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn ping(offset: i64) -> Message {
        inbound(offset, b"ping")
    }

    fn inbound(offset: i64, value: &[u8]) -> Message {
        Message {
            topic: "pings".to_string(),
            partition: 0,
            offset,
            key: None,
            value: value.to_vec(),
        }
    }

    #[tokio::test]
    async fn test_one_pong_per_ping_and_flushed() {
        let broker = MemoryBroker::new();
        let shutdown = CancellationToken::new();
        for _ in 0..4 {
            broker.inject(ping(-1));
        }
        let subscription = broker.subscribe("pings", "ping-consumer", &shutdown).await.unwrap();
        let publisher = broker.publisher().await.unwrap();
        let settings = RelaySettings::default().with_delay(Duration::ZERO);

        let mut stream = subscription.stream;
        let relay = tokio::spawn(async move {
            relay_pings(&mut stream, publisher.as_ref(), &settings).await
        });

        tokio::time::timeout(Duration::from_secs(2), async {
            while broker.count("pongs") < 4 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("four pongs");
        shutdown.cancel();

        assert_eq!(relay.await.unwrap(), 4);
        assert_eq!(broker.count("pongs"), 4);
        assert_eq!(broker.flushes(), 4);
        assert_eq!(broker.max_in_flight(), 1);
        assert!(broker.messages("pongs").iter().all(|m| m.value == b"pong"));
    }

    #[tokio::test]
    async fn test_forward_failure_is_skipped() {
        let broker = MemoryBroker::new();
        broker.fail_deliveries("pongs");
        let shutdown = CancellationToken::new();
        broker.inject(ping(-1));
        broker.inject(ping(-1));
        let subscription = broker.subscribe("pings", "ping-consumer", &shutdown).await.unwrap();
        let publisher = broker.publisher().await.unwrap();
        let settings = RelaySettings::default().with_delay(Duration::ZERO);

        let mut stream = subscription.stream;
        let relay = tokio::spawn(async move {
            relay_pings(&mut stream, publisher.as_ref(), &settings).await
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();

        assert_eq!(relay.await.unwrap(), 0);
        assert_eq!(broker.count("pongs"), 0);
    }

    #[tokio::test]
    async fn test_empty_message_gets_no_pong() {
        let broker = MemoryBroker::new();
        let shutdown = CancellationToken::new();
        broker.inject(inbound(-1, b""));
        broker.inject(ping(-1));
        let subscription = broker.subscribe("pings", "ping-consumer", &shutdown).await.unwrap();
        let publisher = broker.publisher().await.unwrap();
        let settings = RelaySettings::default().with_delay(Duration::ZERO);

        let mut stream = subscription.stream;
        let relay = tokio::spawn(async move {
            relay_pings(&mut stream, publisher.as_ref(), &settings).await
        });

        tokio::time::timeout(Duration::from_secs(2), async {
            while broker.count("pongs") < 1 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("pong for the real ping");
        tokio::time::sleep(Duration::from_millis(30)).await;
        shutdown.cancel();

        assert_eq!(relay.await.unwrap(), 1);
        assert_eq!(broker.count("pongs"), 1);
        assert_eq!(broker.flushes(), 1);
    }
}
