//! Cancellable inbound message streams.

use crate::error::Result;
use crate::message::Message;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Messages buffered between a client's pump and the role reading them.
pub(crate) const STREAM_BUFFER: usize = 1;

/// A lazy, unbounded, non-restartable sequence of inbound messages.
///
/// [`next`](Self::next) waits for either the next message or cancellation,
/// so an interrupt never deadlocks against a consumer blocked on receive.
#[derive(Debug)]
pub struct MessageStream {
    rx: mpsc::Receiver<Message>,
    cancel: CancellationToken,
}

impl MessageStream {
    pub(crate) fn new(rx: mpsc::Receiver<Message>, cancel: CancellationToken) -> Self {
        Self { rx, cancel }
    }

    /// Waits for the next message. `None` once the stream is cancelled or the
    /// client behind it has stopped.
    pub async fn next(&mut self) -> Option<Message> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            message = self.rx.recv() => message,
        }
    }

    /// Token that ends this stream.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// Owner of a subscription's background client task.
///
/// Stopping cancels the stream, then waits for the client task to leave its
/// consumer group and drop its connections. Stopping twice is a no-op.
#[derive(Debug)]
pub struct ConsumerHandle {
    label: String,
    cancel: CancellationToken,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl ConsumerHandle {
    pub fn new(label: impl Into<String>, cancel: CancellationToken, pump: JoinHandle<()>) -> Self {
        Self {
            label: label.into(),
            cancel,
            pump: Mutex::new(Some(pump)),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub async fn stop(&self) -> Result<()> {
        self.cancel.cancel();
        let Some(pump) = self.pump.lock().await.take() else {
            debug!("Consumer {} already stopped", self.label);
            return Ok(());
        };
        pump.await?;
        info!("Consumer {} stopped", self.label);
        Ok(())
    }
}

/// A live subscription: the stream a role reads, and the handle that releases it.
#[derive(Debug)]
pub struct Subscription {
    pub stream: MessageStream,
    pub handle: std::sync::Arc<ConsumerHandle>,
}

impl Subscription {
    /// Channel and token for a new client pump. The token is a child of
    /// `shutdown`, so a process-wide interrupt ends every stream.
    pub(crate) fn channel(
        shutdown: &CancellationToken,
    ) -> (mpsc::Sender<Message>, mpsc::Receiver<Message>, CancellationToken) {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        (tx, rx, shutdown.child_token())
    }

    pub(crate) fn new(
        label: String,
        rx: mpsc::Receiver<Message>,
        cancel: CancellationToken,
        pump: JoinHandle<()>,
    ) -> Self {
        Self {
            stream: MessageStream::new(rx, cancel.clone()),
            handle: std::sync::Arc::new(ConsumerHandle::new(label, cancel, pump)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn message(offset: i64) -> Message {
        Message {
            topic: "pings".to_string(),
            partition: 0,
            offset,
            key: None,
            value: b"ping".to_vec(),
        }
    }

    #[tokio::test]
    async fn test_cancel_interrupts_blocked_receive() {
        let shutdown = CancellationToken::new();
        let (tx, rx, cancel) = Subscription::channel(&shutdown);
        let mut stream = MessageStream::new(rx, cancel);

        let waiter = tokio::spawn(async move { stream.next().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown.cancel();

        let received = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("receive should be interrupted")
            .unwrap();
        assert!(received.is_none());
        drop(tx);
    }

    #[tokio::test]
    async fn test_stream_yields_in_order() {
        let shutdown = CancellationToken::new();
        let (tx, rx, cancel) = Subscription::channel(&shutdown);
        let mut stream = MessageStream::new(rx, cancel);

        tokio::spawn(async move {
            for offset in 0..3 {
                tx.send(message(offset)).await.unwrap();
            }
        });

        for expected in 0..3 {
            assert_eq!(stream.next().await.unwrap().offset, expected);
        }
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let shutdown = CancellationToken::new();
        let (_tx, rx, cancel) = Subscription::channel(&shutdown);
        let pump_cancel = cancel.clone();
        let pump = tokio::spawn(async move { pump_cancel.cancelled().await });
        let subscription = Subscription::new("test".to_string(), rx, cancel, pump);

        subscription.handle.stop().await.unwrap();
        subscription.handle.stop().await.unwrap();
        assert!(subscription.stream.cancellation().is_cancelled());
        // stopping one subscription leaves the process token alone
        assert!(!shutdown.is_cancelled());
    }
}
