//! Interrupt handling and release of broker handles.
//!
//! Every role registers the producers and consumers it creates with the
//! process's [`ShutdownController`]. The controller moves from running to
//! stopping exactly once; on that transition it cancels every open stream,
//! flushes and closes every producer, then stops every consumer.

use crate::broker::{ConsumerHandle, Publisher};
use crate::error::Result;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Exit status after a normal run.
pub const EXIT_SUCCESS: i32 = 0;

/// Exit status when a role fails, including connection failures at startup.
pub const EXIT_FAILURE: i32 = 1;

/// Exit status after an interrupt-triggered shutdown.
pub const EXIT_INTERRUPTED: i32 = 130;

/// Handles owned by this process.
#[derive(Default)]
pub struct Registry {
    producers: Mutex<Vec<Arc<dyn Publisher>>>,
    consumers: Mutex<Vec<Arc<ConsumerHandle>>>,
}

impl Registry {
    pub fn register_producer(&self, producer: Arc<dyn Publisher>) {
        lock(&self.producers).push(producer);
    }

    pub fn register_consumer(&self, consumer: Arc<ConsumerHandle>) {
        debug!("Registered consumer {}", consumer.label());
        lock(&self.consumers).push(consumer);
    }

    pub fn producers(&self) -> usize {
        lock(&self.producers).len()
    }

    pub fn consumers(&self) -> usize {
        lock(&self.consumers).len()
    }

    /// Flushes and closes producers, then stops consumers. Failures are
    /// logged and do not stop the remaining releases.
    async fn release_all(&self) {
        let producers: Vec<_> = lock(&self.producers).drain(..).collect();
        let consumers: Vec<_> = lock(&self.consumers).drain(..).collect();

        for producer in producers {
            if let Err(e) = producer.close().await {
                warn!("Failed to close producer: {}", e);
            }
        }
        for consumer in consumers {
            if let Err(e) = consumer.stop().await {
                warn!("Failed to stop consumer {}: {}", consumer.label(), e);
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Running → stopping state machine for one process.
pub struct ShutdownController {
    stopping: AtomicBool,
    token: CancellationToken,
    registry: Registry,
}

impl ShutdownController {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            stopping: AtomicBool::new(false),
            token: CancellationToken::new(),
            registry: Registry::default(),
        })
    }

    /// Cancelled once the controller starts stopping.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    /// Handles an interrupt. The first call releases every registered handle
    /// and returns [`EXIT_INTERRUPTED`]; later calls return `None` and touch
    /// nothing.
    pub async fn interrupt(&self) -> Option<i32> {
        if !self.begin_stopping() {
            debug!("Shutdown already in progress");
            return None;
        }
        info!("Exiting...");
        self.release().await;
        Some(EXIT_INTERRUPTED)
    }

    /// Releases handles after a role finished on its own. No-op if an
    /// interrupt already did.
    pub async fn complete(&self) {
        if self.begin_stopping() {
            self.release().await;
        }
    }

    fn begin_stopping(&self) -> bool {
        self.stopping
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    async fn release(&self) {
        self.token.cancel();
        self.registry.release_all().await;
        info!("Broker handles released");
    }
}

/// Runs `role` on its own task and waits for it or for `signal`, whichever
/// comes first. Returns the process exit status.
///
/// If the signal listener itself fails, the role keeps running without an
/// interrupt hook.
pub async fn supervise<R, S>(controller: Arc<ShutdownController>, role: R, signal: S) -> i32
where
    R: Future<Output = Result<()>> + Send + 'static,
    S: Future<Output = std::io::Result<()>>,
{
    let mut role = tokio::spawn(role);

    tokio::select! {
        received = signal => match received {
            Ok(()) => return controller.interrupt().await.unwrap_or(EXIT_INTERRUPTED),
            Err(e) => error!("Unable to listen for interrupts: {}", e),
        },
        finished = &mut role => return finish(&controller, finished).await,
    }

    let finished = role.await;
    finish(&controller, finished).await
}

async fn finish(
    controller: &ShutdownController,
    finished: std::result::Result<Result<()>, JoinError>,
) -> i32 {
    controller.complete().await;
    match finished {
        Ok(Ok(())) => EXIT_SUCCESS,
        Ok(Err(e)) => {
            error!("Role failed: {}", e);
            EXIT_FAILURE
        }
        Err(e) => {
            error!("Role task failed: {}", e);
            EXIT_FAILURE
        }
    }
}
