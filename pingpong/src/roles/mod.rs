//! The harness roles. Each one is a single loop written against the
//! [`Broker`](crate::broker::Broker) interface.

mod drain;
mod producer;
mod relay;

pub use drain::{drain, run_drain};
pub use producer::{produce_pings, run_ping_producer};
pub use relay::{relay_pings, run_relay};

use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Sleeps for `delay`. Returns true if `cancel` fired first.
async fn pause(delay: Duration, cancel: &CancellationToken) -> bool {
    if delay.is_zero() {
        return cancel.is_cancelled();
    }
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(delay) => false,
    }
}
