use clap::{Args, Parser, Subcommand};
use pingpong::config::{PING_GROUP, PONG_GROUP};
use pingpong::shutdown::supervise;
use pingpong::{
    connect, roles, Broker, ClientKind, ConnectionConfig, DrainSettings, PartitionSelector,
    ProducerSettings, RelaySettings, ShutdownController,
};
use std::time::Duration;

#[derive(Parser)]
#[command(
    name = "pingpong",
    about = "Ping-pong producer/consumer harness for Kafka brokers"
)]
struct Cli {
    #[command(flatten)]
    connection: ConnectionArgs,

    #[command(subcommand)]
    role: Role,
}

#[derive(Args)]
struct ConnectionArgs {
    /// Bootstrap brokers, comma separated.
    #[arg(
        long,
        env = "KAFKA_BROKERS",
        value_delimiter = ',',
        default_value = "localhost:9092",
        global = true
    )]
    brokers: Vec<String>,

    /// Client id reported to the broker.
    #[arg(
        long,
        env = "KAFKA_CLIENT_ID",
        default_value = pingpong::config::DEFAULT_CLIENT_ID,
        global = true
    )]
    client_id: String,

    /// Client library used to talk to the broker.
    #[arg(
        long,
        value_enum,
        env = "PINGPONG_CLIENT",
        default_value_t = ClientKind::Native,
        global = true
    )]
    client: ClientKind,

    /// Longest single fetch wait for the native consumer, in milliseconds.
    #[arg(long, default_value_t = 250, global = true)]
    poll_ms: u64,

    /// How long to wait for cluster metadata when connecting, in milliseconds.
    #[arg(long, default_value_t = 10_000, global = true)]
    connect_timeout_ms: u64,
}

#[derive(Subcommand)]
enum Role {
    /// Publish "ping" to `pings` on a fixed interval.
    Produce {
        #[arg(long, default_value_t = 500)]
        interval_ms: u64,

        /// Pick a partition uniformly from 0..N for every ping.
        #[arg(long)]
        partitions: Option<u32>,

        /// Stop after this many pings.
        #[arg(long)]
        count: Option<u64>,
    },
    /// Answer every ping on `pings` with a pong on `pongs`.
    Relay {
        #[arg(long, default_value = PING_GROUP)]
        group: String,

        #[arg(long, default_value_t = 500)]
        delay_ms: u64,

        /// Pick a partition uniformly from 0..N for every pong.
        #[arg(long)]
        partitions: Option<u32>,
    },
    /// Log everything arriving on a topic.
    Drain {
        #[arg(long, default_value = "pongs")]
        topic: String,

        #[arg(long, default_value = PONG_GROUP)]
        group: String,

        #[arg(long, default_value_t = 0)]
        delay_ms: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))?;

    let cli = Cli::parse();
    anyhow::ensure!(
        cli.connection.brokers.iter().any(|b| !b.trim().is_empty()),
        "at least one bootstrap broker is required"
    );

    let connection = ConnectionConfig::new(cli.connection.brokers)
        .with_client_id(cli.connection.client_id)
        .with_poll_interval(Duration::from_millis(cli.connection.poll_ms))
        .with_probe_timeout(Duration::from_millis(cli.connection.connect_timeout_ms));
    let broker = connect(cli.connection.client, connection);
    tracing::info!(client = broker.kind(), "broker client selected");

    let controller = ShutdownController::new();
    let signal = tokio::signal::ctrl_c();

    let code = match cli.role {
        Role::Produce {
            interval_ms,
            partitions,
            count,
        } => {
            let settings = ProducerSettings::default()
                .with_interval(Duration::from_millis(interval_ms))
                .with_partitions(PartitionSelector::from_count(partitions))
                .with_max_messages(count);
            let role = roles::run_ping_producer(broker, controller.clone(), settings);
            supervise(controller, role, signal).await
        }
        Role::Relay {
            group,
            delay_ms,
            partitions,
        } => {
            let settings = RelaySettings::default()
                .with_group_id(group)
                .with_delay(Duration::from_millis(delay_ms))
                .with_partitions(PartitionSelector::from_count(partitions));
            let role = roles::run_relay(broker, controller.clone(), settings);
            supervise(controller, role, signal).await
        }
        Role::Drain {
            topic,
            group,
            delay_ms,
        } => {
            let settings = DrainSettings::default()
                .with_topic(topic)
                .with_group_id(group)
                .with_delay(Duration::from_millis(delay_ms));
            let role = roles::run_drain(broker, controller.clone(), settings);
            supervise(controller, role, signal).await
        }
    };

    std::process::exit(code);
}
