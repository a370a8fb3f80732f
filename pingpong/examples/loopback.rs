//! Runs all three roles in one process against the in-process broker.
//!
//! This example shows how to:
//! - Start the ping producer, relay and drain on a shared broker
//! - Register every handle with one ShutdownController
//! - Stop everything with Ctrl+C or after a bounded producer run
//!
//! To run this example:
//! ```bash
//! cargo run --example loopback
//! ```

use pingpong::{
    roles, Broker, DrainSettings, MemoryBroker, PartitionSelector, ProducerSettings,
    RelaySettings, ShutdownController,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    let memory = MemoryBroker::new();
    let broker: Arc<dyn Broker> = Arc::new(memory.clone());
    let controller = ShutdownController::new();

    let relay = tokio::spawn(roles::run_relay(
        Arc::clone(&broker),
        controller.clone(),
        RelaySettings::default()
            .with_delay(Duration::from_millis(100))
            .with_partitions(PartitionSelector::from_count(Some(3))),
    ));
    let drain = tokio::spawn(roles::run_drain(
        Arc::clone(&broker),
        controller.clone(),
        DrainSettings::default(),
    ));

    let producer = roles::run_ping_producer(
        Arc::clone(&broker),
        controller.clone(),
        ProducerSettings::default()
            .with_interval(Duration::from_millis(200))
            .with_partitions(PartitionSelector::from_count(Some(3)))
            .with_max_messages(Some(10)),
    );

    tokio::select! {
        result = producer => result?,
        _ = tokio::signal::ctrl_c() => info!("Received shutdown signal (Ctrl+C)"),
    }

    // let the relay catch up before tearing everything down
    tokio::time::sleep(Duration::from_secs(1)).await;
    controller.interrupt().await;
    relay.await??;
    drain.await??;

    info!(
        "pings: {}, pongs: {}",
        memory.count("pings"),
        memory.count("pongs")
    );
    Ok(())
}
