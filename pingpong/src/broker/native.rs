//! Pure-Rust protocol client (`kafka` crate).
//!
//! The crate is synchronous: publishes run on the blocking pool, and each
//! subscription owns a blocking task that polls with a bounded fetch wait and
//! checks for cancellation between polls.

use super::{Broker, Publisher, Subscription};
use crate::config::ConnectionConfig;
use crate::error::{HarnessError, Result};
use crate::message::{Delivery, Message, Record};
use async_trait::async_trait;
use kafka::consumer::{Consumer, FetchOffset, GroupOffsetStorage};
use kafka::producer::{Producer, Record as NativeRecord, RequiredAcks};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Partition value that lets the producer's partitioner decide.
const ANY_PARTITION: i32 = -1;

/// Wait between attempts to hand a message to a full subscription channel.
const HAND_OFF_RETRY: Duration = Duration::from_millis(10);

/// Client built on the `kafka` crate's synchronous producer and consumer.
#[derive(Debug, Clone)]
pub struct NativeBroker {
    config: ConnectionConfig,
}

impl NativeBroker {
    pub fn new(config: ConnectionConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Broker for NativeBroker {
    fn kind(&self) -> &'static str {
        "native"
    }

    async fn publisher(&self) -> Result<Arc<dyn Publisher>> {
        info!(
            "Creating native producer with brokers: {}",
            self.config.bootstrap_servers()
        );

        let config = self.config.clone();
        let producer = tokio::task::spawn_blocking(move || {
            Producer::from_hosts(config.brokers)
                .with_client_id(config.client_id)
                .with_ack_timeout(config.delivery_timeout)
                .with_required_acks(RequiredAcks::One)
                .create()
                .map_err(|e| HarnessError::Connection(e.to_string()))
        })
        .await??;

        Ok(Arc::new(NativePublisher {
            inner: Arc::new(Mutex::new(Some(producer))),
        }))
    }

    async fn subscribe(
        &self,
        topic: &str,
        group_id: &str,
        shutdown: &CancellationToken,
    ) -> Result<Subscription> {
        info!(
            "Creating native consumer with brokers: {}, group: {}",
            self.config.bootstrap_servers(),
            group_id
        );

        let (tx, rx, cancel) = Subscription::channel(shutdown);
        let (ready_tx, ready_rx) = oneshot::channel();
        let target = PollTarget {
            config: self.config.clone(),
            topic: topic.to_string(),
            group_id: group_id.to_string(),
        };

        let poll_cancel = cancel.clone();
        let pump = tokio::task::spawn_blocking(move || poll(target, tx, poll_cancel, ready_tx));

        match ready_rx.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                pump.await?;
                return Err(HarnessError::Connection(
                    "native consumer exited before connecting".to_string(),
                ));
            }
        }

        let label = format!("native:{}/{}", group_id, topic);
        Ok(Subscription::new(label, rx, cancel, pump))
    }
}

struct PollTarget {
    config: ConnectionConfig,
    topic: String,
    group_id: String,
}

/// Blocking poll loop. Reports construction success or failure on `ready`
/// before the first poll, then feeds messages until cancelled.
fn poll(
    target: PollTarget,
    tx: mpsc::Sender<Message>,
    cancel: CancellationToken,
    ready: oneshot::Sender<Result<()>>,
) {
    let created = Consumer::from_hosts(target.config.brokers.clone())
        .with_client_id(target.config.client_id.clone())
        .with_topic(target.topic.clone())
        .with_group(target.group_id.clone())
        .with_fallback_offset(FetchOffset::Earliest)
        .with_offset_storage(Some(GroupOffsetStorage::Kafka))
        .with_fetch_max_wait_time(target.config.poll_interval)
        .create();

    let mut consumer = match created {
        Ok(consumer) => consumer,
        Err(e) => {
            let _ = ready.send(Err(HarnessError::Connection(e.to_string())));
            return;
        }
    };
    if ready.send(Ok(())).is_err() {
        return;
    }

    info!("Starting consumer loop");

    'poll: while !cancel.is_cancelled() {
        let sets = match consumer.poll() {
            Ok(sets) => sets,
            Err(e) => {
                error!("Error receiving message: {}", e);
                thread::sleep(target.config.poll_interval);
                continue;
            }
        };

        for set in sets.iter() {
            let topic = set.topic().to_string();
            let partition = set.partition();

            for m in set.messages() {
                let Some(message) =
                    Message::received(&topic, partition, m.offset, Some(m.key), Some(m.value))
                else {
                    continue;
                };
                if !hand_off(&tx, message, &cancel) {
                    break 'poll;
                }
            }

            if let Err(e) = consumer.consume_messageset(set) {
                warn!("Failed to mark message set consumed: {}", e);
            }
        }

        if let Err(e) = consumer.commit_consumed() {
            warn!("Failed to commit offsets: {}", e);
        }
    }

    // hand processed offsets back so the next member resumes where this one stopped
    if let Err(e) = consumer.commit_consumed() {
        warn!("Failed to commit offsets on stop: {}", e);
    }
    debug!("Native consumer for {}/{} released", target.group_id, target.topic);
}

/// Puts `message` on the subscription channel, waiting for room while the
/// reader is busy. Returns false once cancelled or the reader is gone.
fn hand_off(
    tx: &mpsc::Sender<Message>,
    mut message: Message,
    cancel: &CancellationToken,
) -> bool {
    loop {
        if cancel.is_cancelled() {
            return false;
        }
        match tx.try_send(message) {
            Ok(()) => return true,
            Err(TrySendError::Full(back)) => {
                message = back;
                thread::sleep(HAND_OFF_RETRY);
            }
            Err(TrySendError::Closed(_)) => return false,
        }
    }
}

struct NativePublisher {
    // `None` once closed
    inner: Arc<Mutex<Option<Producer>>>,
}

#[async_trait]
impl Publisher for NativePublisher {
    async fn publish(&self, record: &Record<'_>) -> Result<Delivery> {
        let inner = Arc::clone(&self.inner);
        let topic = record.topic.to_string();
        let key = record.key.map(<[u8]>::to_vec);
        let value = record.value.to_vec();
        let partition = record.partition;

        debug!("Sending message to topic '{}' ({} bytes)", topic, value.len());

        tokio::task::spawn_blocking(move || {
            let mut guard = inner
                .lock()
                .map_err(|_| HarnessError::Closed("native producer".to_string()))?;
            let producer = guard
                .as_mut()
                .ok_or_else(|| HarnessError::Closed("native producer".to_string()))?;

            let target = partition.unwrap_or(ANY_PARTITION);
            let sent = match key {
                Some(key) => producer.send(
                    &NativeRecord::from_key_value(&topic, key.as_slice(), value.as_slice())
                        .with_partition(target),
                ),
                None => producer.send(
                    &NativeRecord::from_value(&topic, value.as_slice()).with_partition(target),
                ),
            };

            sent.map_err(|e| HarnessError::delivery(topic.as_str(), e))?;
            debug!("Message sent successfully to topic '{}'", topic);
            Ok(Delivery {
                partition,
                offset: None,
            })
        })
        .await?
    }

    async fn flush(&self) -> Result<()> {
        // every send already waited for the broker's ack
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let mut guard = inner
                .lock()
                .map_err(|_| HarnessError::Closed("native producer".to_string()))?;
            if guard.take().is_some() {
                info!("Native producer closed");
            }
            Ok(())
        })
        .await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ping(offset: i64) -> Message {
        Message::received("pings", 0, offset, None, Some(&b"ping"[..])).unwrap()
    }

    #[test]
    fn test_hand_off_waits_for_room() {
        let (tx, mut rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        assert!(hand_off(&tx, ping(0), &cancel));

        let reader = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            let first = rx.blocking_recv().map(|m| m.offset);
            let second = rx.blocking_recv().map(|m| m.offset);
            (first, second)
        });

        assert!(hand_off(&tx, ping(1), &cancel));
        drop(tx);
        assert_eq!(reader.join().unwrap(), (Some(0), Some(1)));
    }

    #[test]
    fn test_hand_off_gives_up_on_cancel_when_full() {
        let (tx, _rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        assert!(hand_off(&tx, ping(0), &cancel));

        let canceller = cancel.clone();
        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            canceller.cancel();
        });

        // the reader never drains, so only the cancel can end this
        assert!(!hand_off(&tx, ping(1), &cancel));
        stopper.join().unwrap();
    }

    #[test]
    fn test_hand_off_stops_when_reader_is_gone() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        assert!(!hand_off(&tx, ping(0), &CancellationToken::new()));
    }
}
