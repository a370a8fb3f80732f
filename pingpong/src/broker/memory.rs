//! In-process broker.
//!
//! Topics are partitioned logs held in memory; consumer groups share one
//! cursor per partition, so members of the same group split the work and
//! different groups each see every message. Used to run the roles and the
//! shutdown path without a live cluster.

use super::{Broker, Publisher, Subscription};
use crate::error::{HarnessError, Result};
use crate::message::{Delivery, Message, Record};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub const DEFAULT_PARTITIONS: u32 = 3;

#[derive(Debug, Default)]
struct State {
    // topic -> partition -> log
    topics: HashMap<String, Vec<Vec<Message>>>,
    // (group, topic) -> next index per partition
    cursors: HashMap<(String, String), Vec<usize>>,
    members: HashMap<String, usize>,
    failing: HashSet<String>,
    unreachable: bool,
    next_partition: usize,
    in_flight: usize,
    max_in_flight: usize,
    flushes: usize,
    closes: usize,
}

#[derive(Debug)]
struct Shared {
    partitions: u32,
    state: Mutex<State>,
    changed: watch::Sender<u64>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self) {
        self.changed.send_modify(|version| *version += 1);
    }

    /// Appends to the message's partition and returns its offset, or `None`
    /// when the partition does not exist.
    fn append(&self, mut message: Message) -> Option<i64> {
        let offset = {
            let mut state = self.lock();
            let partitions = self.partitions as usize;
            let log = state
                .topics
                .entry(message.topic.clone())
                .or_insert_with(|| vec![Vec::new(); partitions]);
            let partition = usize::try_from(message.partition)
                .ok()
                .and_then(|p| log.get_mut(p))?;
            if message.offset < 0 {
                message.offset = partition.last().map_or(0, |m| m.offset + 1);
            }
            let offset = message.offset;
            partition.push(message);
            offset
        };
        self.notify();
        Some(offset)
    }

    fn claim(&self, group: &str, topic: &str) -> Option<Message> {
        let mut state = self.lock();
        let State {
            topics, cursors, ..
        } = &mut *state;
        let log = topics.get(topic)?;
        let cursors = cursors
            .entry((group.to_string(), topic.to_string()))
            .or_insert_with(|| vec![0; log.len()]);

        for (partition, messages) in log.iter().enumerate() {
            let next = cursors[partition];
            if let Some(message) = messages.get(next) {
                cursors[partition] = next + 1;
                return Some(message.clone());
            }
        }
        None
    }
}

/// Handle to an in-process broker. Clones share the same topics.
#[derive(Debug, Clone)]
pub struct MemoryBroker {
    shared: Arc<Shared>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::with_partitions(DEFAULT_PARTITIONS)
    }

    pub fn with_partitions(partitions: u32) -> Self {
        let (changed, _) = watch::channel(0);
        Self {
            shared: Arc::new(Shared {
                partitions: partitions.max(1),
                state: Mutex::new(State::default()),
                changed,
            }),
        }
    }

    /// Appends a message as-is, bypassing any publisher. A negative offset is
    /// replaced with the partition's next offset.
    pub fn inject(&self, message: Message) -> Option<i64> {
        self.shared.append(message)
    }

    /// Every message on `topic`, partition by partition.
    pub fn messages(&self, topic: &str) -> Vec<Message> {
        self.shared
            .lock()
            .topics
            .get(topic)
            .map(|log| log.iter().flatten().cloned().collect())
            .unwrap_or_default()
    }

    pub fn count(&self, topic: &str) -> usize {
        self.shared
            .lock()
            .topics
            .get(topic)
            .map_or(0, |log| log.iter().map(Vec::len).sum())
    }

    /// Active members of `group`.
    pub fn members(&self, group: &str) -> usize {
        self.shared.lock().members.get(group).copied().unwrap_or(0)
    }

    /// Makes every later publish to `topic` fail.
    pub fn fail_deliveries(&self, topic: &str) {
        self.shared.lock().failing.insert(topic.to_string());
    }

    /// Makes every later publisher or subscription construction fail.
    pub fn refuse_connections(&self) {
        self.shared.lock().unreachable = true;
    }

    /// Most publishes ever in flight at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.shared.lock().max_in_flight
    }

    pub fn flushes(&self) -> usize {
        self.shared.lock().flushes
    }

    pub fn closes(&self) -> usize {
        self.shared.lock().closes
    }

    fn check_reachable(&self) -> Result<()> {
        if self.shared.lock().unreachable {
            return Err(HarnessError::Connection(
                "in-process broker refused the connection".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn publisher(&self) -> Result<Arc<dyn Publisher>> {
        self.check_reachable()?;
        Ok(Arc::new(MemoryPublisher {
            shared: Arc::clone(&self.shared),
            closed: AtomicBool::new(false),
        }))
    }

    async fn subscribe(
        &self,
        topic: &str,
        group_id: &str,
        shutdown: &CancellationToken,
    ) -> Result<Subscription> {
        self.check_reachable()?;

        let member = Membership::join(Arc::clone(&self.shared), group_id);
        let (tx, rx, cancel) = Subscription::channel(shutdown);
        let pump = tokio::spawn(pump(member, topic.to_string(), tx, cancel.clone()));
        Ok(Subscription::new(
            format!("memory:{}/{}", group_id, topic),
            rx,
            cancel,
            pump,
        ))
    }
}

/// Group membership that ends when the consumer's task does.
struct Membership {
    shared: Arc<Shared>,
    group: String,
}

impl Membership {
    fn join(shared: Arc<Shared>, group: &str) -> Self {
        *shared.lock().members.entry(group.to_string()).or_default() += 1;
        Self {
            shared,
            group: group.to_string(),
        }
    }
}

impl Drop for Membership {
    fn drop(&mut self) {
        let mut state = self.shared.lock();
        if let Some(count) = state.members.get_mut(&self.group) {
            *count = count.saturating_sub(1);
        }
        debug!("Member left group {}", self.group);
    }
}

async fn pump(
    member: Membership,
    topic: String,
    tx: mpsc::Sender<Message>,
    cancel: CancellationToken,
) {
    let mut changed = member.shared.changed.subscribe();

    loop {
        changed.borrow_and_update();
        match member.shared.claim(&member.group, &topic) {
            Some(claimed) => {
                let Some(message) = claimed.accept() else {
                    continue;
                };
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    sent = tx.send(message) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
            }
            None => {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    res = changed.changed() => {
                        if res.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }
}

struct MemoryPublisher {
    shared: Arc<Shared>,
    closed: AtomicBool,
}

#[async_trait]
impl Publisher for MemoryPublisher {
    async fn publish(&self, record: &Record<'_>) -> Result<Delivery> {
        if self.closed.load(Ordering::Acquire) {
            return Err(HarnessError::Closed("memory producer".to_string()));
        }

        let partition = {
            let mut state = self.shared.lock();
            if state.failing.contains(record.topic) {
                return Err(HarnessError::delivery(record.topic, "topic rejected the write"));
            }
            let partition = match record.partition {
                Some(p) if p >= 0 && (p as u32) < self.shared.partitions => p,
                Some(p) => {
                    return Err(HarnessError::delivery(
                        record.topic,
                        format!("unknown partition {}", p),
                    ))
                }
                None => {
                    let p = state.next_partition % self.shared.partitions as usize;
                    state.next_partition += 1;
                    p as i32
                }
            };
            state.in_flight += 1;
            state.max_in_flight = state.max_in_flight.max(state.in_flight);
            partition
        };

        // give a concurrent publisher the chance to overlap with this one
        tokio::task::yield_now().await;

        let offset = self.shared.append(Message {
            topic: record.topic.to_string(),
            partition,
            offset: -1,
            key: record.key.map(<[u8]>::to_vec),
            value: record.value.to_vec(),
        });
        self.shared.lock().in_flight -= 1;

        Ok(Delivery {
            partition: Some(partition),
            offset,
        })
    }

    async fn flush(&self) -> Result<()> {
        self.shared.lock().flushes += 1;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.shared.lock().closes += 1;
        }
        Ok(())
    }
}
