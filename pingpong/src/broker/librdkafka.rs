//! librdkafka-backed client.

use super::{Broker, Publisher, Subscription};
use crate::config::ConnectionConfig;
use crate::error::{HarnessError, Result};
use crate::message::{Delivery, Message as InboundMessage, Record};
use async_trait::async_trait;
use rdkafka::consumer::{Consumer as RdConsumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer as RdProducer};
use rdkafka::ClientConfig;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Client built on `rdkafka`'s `FutureProducer` and `StreamConsumer`.
#[derive(Debug, Clone)]
pub struct RdKafkaBroker {
    config: ConnectionConfig,
}

impl RdKafkaBroker {
    pub fn new(config: ConnectionConfig) -> Self {
        Self { config }
    }

    pub(crate) fn producer_config(&self) -> ClientConfig {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", self.config.bootstrap_servers())
            .set("client.id", &self.config.client_id)
            .set(
                "message.timeout.ms",
                self.config.delivery_timeout.as_millis().to_string(),
            );
        client_config
    }

    pub(crate) fn consumer_config(&self, group_id: &str) -> ClientConfig {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", self.config.bootstrap_servers())
            .set("client.id", &self.config.client_id)
            .set("group.id", group_id)
            .set("enable.auto.commit", "true")
            .set("auto.offset.reset", "earliest")
            .set("session.timeout.ms", "6000")
            .set("enable.partition.eof", "false");
        client_config
    }
}

#[async_trait]
impl Broker for RdKafkaBroker {
    fn kind(&self) -> &'static str {
        "librdkafka"
    }

    async fn publisher(&self) -> Result<Arc<dyn Publisher>> {
        info!(
            "Creating librdkafka producer with brokers: {}",
            self.config.bootstrap_servers()
        );

        let producer: FutureProducer = self.producer_config().create()?;

        // creation is lazy; fetch metadata so an unreachable cluster fails here
        let probe = producer.clone();
        let timeout = self.config.probe_timeout;
        tokio::task::spawn_blocking(move || {
            probe
                .client()
                .fetch_metadata(None, timeout)
                .map(|_| ())
                .map_err(|e| HarnessError::Connection(e.to_string()))
        })
        .await??;

        Ok(Arc::new(RdKafkaPublisher {
            inner: producer,
            config: self.config.clone(),
            closed: AtomicBool::new(false),
        }))
    }

    async fn subscribe(
        &self,
        topic: &str,
        group_id: &str,
        shutdown: &CancellationToken,
    ) -> Result<Subscription> {
        info!(
            "Creating librdkafka consumer with brokers: {}, group: {}",
            self.config.bootstrap_servers(),
            group_id
        );

        let client_config = self.consumer_config(group_id);
        let timeout = self.config.probe_timeout;
        let probe_topic = topic.to_string();
        let consumer = tokio::task::spawn_blocking(move || -> Result<StreamConsumer> {
            let consumer: StreamConsumer = client_config.create()?;
            consumer
                .fetch_metadata(Some(probe_topic.as_str()), timeout)
                .map(|_| ())
                .map_err(|e| HarnessError::Connection(e.to_string()))?;
            Ok(consumer)
        })
        .await??;

        info!("Subscribing to topic: {}", topic);
        consumer.subscribe(&[topic])?;

        let (tx, rx, cancel) = Subscription::channel(shutdown);
        let label = format!("librdkafka:{}/{}", group_id, topic);
        let pump = tokio::spawn(pump(consumer, tx, cancel.clone()));
        Ok(Subscription::new(label, rx, cancel, pump))
    }
}

/// Feeds received messages into the subscription channel until cancelled.
///
/// Dropping the consumer at the end closes it, which leaves the group so the
/// broker can reassign its partitions immediately.
async fn pump(
    consumer: StreamConsumer,
    tx: mpsc::Sender<InboundMessage>,
    cancel: CancellationToken,
) {
    info!("Starting consumer loop");

    loop {
        let inbound = {
            let received = tokio::select! {
                _ = cancel.cancelled() => break,
                received = consumer.recv() => received,
            };
            match received {
                Ok(message) => detach(&message),
                Err(e) => {
                    error!("Error receiving message: {}", e);
                    None
                }
            }
        };
        let Some(inbound) = inbound else {
            continue;
        };

        tokio::select! {
            _ = cancel.cancelled() => break,
            sent = tx.send(inbound) => {
                if sent.is_err() {
                    break;
                }
            }
        }
    }

    consumer.unsubscribe();
    info!("Consumer stopped");
}

/// Copies a borrowed message out of the consumer.
fn detach<M: Message>(message: &M) -> Option<InboundMessage> {
    InboundMessage::received(
        message.topic(),
        message.partition(),
        message.offset(),
        message.key(),
        message.payload(),
    )
}

struct RdKafkaPublisher {
    inner: FutureProducer,
    config: ConnectionConfig,
    closed: AtomicBool,
}

#[async_trait]
impl Publisher for RdKafkaPublisher {
    async fn publish(&self, record: &Record<'_>) -> Result<Delivery> {
        if self.closed.load(Ordering::Acquire) {
            return Err(HarnessError::Closed("librdkafka producer".to_string()));
        }

        let topic = record.topic;
        debug!(
            "Sending message to topic '{}' ({} bytes)",
            topic,
            record.value.len()
        );

        let future_record = FutureRecord {
            topic,
            partition: record.partition,
            payload: Some(record.value),
            key: record.key,
            timestamp: None,
            headers: None,
        };

        match self
            .inner
            .send(future_record, self.config.delivery_timeout)
            .await
        {
            Ok((partition, offset)) => {
                debug!(
                    "Message sent successfully to topic '{}' (partition: {}, offset: {})",
                    topic, partition, offset
                );
                Ok(Delivery {
                    partition: Some(partition),
                    offset: Some(offset),
                })
            }
            Err((kafka_err, _msg)) => Err(HarnessError::delivery(topic, kafka_err)),
        }
    }

    async fn flush(&self) -> Result<()> {
        self.flush_blocking().await
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        info!("Flushing librdkafka producer");
        self.flush_blocking().await
    }
}

impl RdKafkaPublisher {
    /// librdkafka's flush blocks the calling thread until the queue drains.
    async fn flush_blocking(&self) -> Result<()> {
        let producer = self.inner.clone();
        let timeout = self.config.delivery_timeout;
        tokio::task::spawn_blocking(move || RdProducer::flush(&producer, timeout)).await??;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn broker() -> RdKafkaBroker {
        RdKafkaBroker::new(
            ConnectionConfig::new(["k1:9092", "k2:9092"])
                .with_client_id("relay-1")
                .with_delivery_timeout(Duration::from_secs(3)),
        )
    }

    #[test]
    fn test_producer_config() {
        let config = broker().producer_config();
        assert_eq!(config.get("bootstrap.servers"), Some("k1:9092,k2:9092"));
        assert_eq!(config.get("client.id"), Some("relay-1"));
        assert_eq!(config.get("message.timeout.ms"), Some("3000"));
    }

    #[tokio::test]
    async fn test_flush_and_close_with_empty_queue() {
        // producer creation is lazy, so nothing here needs a reachable broker
        let broker = RdKafkaBroker::new(ConnectionConfig::new(["127.0.0.1:1"]));
        let publisher = RdKafkaPublisher {
            inner: broker.producer_config().create().unwrap(),
            config: broker.config.clone(),
            closed: AtomicBool::new(false),
        };

        publisher.flush().await.unwrap();
        publisher.close().await.unwrap();
        publisher.close().await.unwrap();

        let err = publisher.publish(&Record::new("pongs", b"pong")).await.unwrap_err();
        assert!(matches!(err, HarnessError::Closed(_)));
    }

    #[test]
    fn test_consumer_config_carries_group() {
        let config = broker().consumer_config("ping-consumer");
        assert_eq!(config.get("group.id"), Some("ping-consumer"));
        assert_eq!(config.get("auto.offset.reset"), Some("earliest"));
        assert_eq!(config.get("enable.partition.eof"), Some("false"));
    }
}
