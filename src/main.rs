//! Todo CDC - Stream processor
//!
//! Reads mutation log batches, derives todo domain events and publishes them to NATS.
//!
//! # Usage
//!
//! ```bash
//! # Process a batch delivered as JSON on stdin
//! todo-cdc process < batch.json
//!
//! # Print derived events instead of publishing them
//! todo-cdc process --input batch.json --dry-run
//!
//! # Watch completed events on the bus
//! todo-cdc tail --event-type todoCompleted
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use todo_cdc::cdc::BatchCoordinator;
use todo_cdc::events::{
    connect_nats, subscribe_events, BusMessage, EventPublisher, EventType, LocalBus,
    NatsPublisher, ReceivedEvent,
};
use todo_cdc::stream::{decode_json, ConsumerSettings, JsonlDeadLetterSink, StreamConsumer};
use todo_cdc::Config;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "todo-cdc")]
#[command(about = "Derive todo domain events from the datastore mutation log")]
#[command(version)]
struct Cli {
    /// Path to the YAML config file (default: ./config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process a mutation log batch
    Process {
        /// Batch file, or "-" for stdin
        #[arg(short, long, default_value = "-")]
        input: String,

        /// Print derived events instead of publishing them to NATS
        #[arg(long)]
        dry_run: bool,
    },

    /// Print events received from the bus
    Tail {
        /// Only this discriminator (todoCreated, todoCompleted, todoDeleted)
        #[arg(short, long)]
        event_type: Option<EventType>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    init_tracing();

    let cli = Cli::parse();
    let config = Config::from_yaml_and_env(cli.config.as_deref())?;

    match cli.command {
        Commands::Process { input, dry_run } => run_process(config, &input, dry_run).await,
        Commands::Tail { event_type } => run_tail(config, event_type).await,
    }
}

/// Logs go to stderr so stdout stays usable for event output.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,todo_cdc=debug".into());
    let json = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn read_input(input: &str) -> Result<String> {
    if input == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read batch from stdin")?;
        Ok(buf)
    } else {
        std::fs::read_to_string(input).with_context(|| format!("Failed to read batch {}", input))
    }
}

async fn run_process(config: Config, input: &str, dry_run: bool) -> Result<()> {
    let decoded = decode_json(&read_input(input)?)?;
    if !decoded.rejected.is_empty() {
        warn!(
            rejected = decoded.rejected.len(),
            "Some log entries were excluded from event derivation"
        );
    }

    let mut printer = None;
    let publisher: Arc<dyn EventPublisher> = if dry_run {
        let bus = LocalBus::default().with_source(config.event_source.clone());
        let rx = bus.subscribe();
        // Ends once the bus (owned by the consumer) is dropped
        printer = Some(tokio::spawn(async move {
            print_events(rx, |line| println!("{}", line)).await;
        }));
        Arc::new(bus)
    } else {
        let client = connect_nats(&config.nats_url).await?;
        let publisher = NatsPublisher::new(
            client,
            config.subject_prefix.clone(),
            config.event_source.clone(),
            config.publish_timeout,
        );
        if config.jetstream {
            Arc::new(publisher.with_jetstream())
        } else {
            Arc::new(publisher)
        }
    };

    let consumer = StreamConsumer::new(
        BatchCoordinator::new(publisher),
        Arc::new(JsonlDeadLetterSink::new(config.dead_letter_path.clone())),
        ConsumerSettings::from(&config),
    );

    let report = consumer.consume(decoded.batch.records).await?;
    drop(consumer);
    if let Some(printer) = printer {
        printer.await.context("Event printer task failed")?;
    }

    info!(
        batches = report.batches,
        published = report.events_published,
        rejected = decoded.rejected.len(),
        dead_lettered = report.dead_lettered_batches,
        "Processing complete"
    );

    if report.has_dead_letters() {
        anyhow::bail!(
            "{} batch(es) exhausted their retries and were written to {}",
            report.dead_lettered_batches,
            config.dead_letter_path.display()
        );
    }
    Ok(())
}

/// Render bus messages as JSON lines until the bus closes.
///
/// A lagging receiver skips ahead and keeps reading. Returns the number of
/// messages that were skipped.
async fn print_events(
    mut rx: broadcast::Receiver<BusMessage>,
    mut emit: impl FnMut(String),
) -> u64 {
    let mut skipped = 0;
    loop {
        match rx.recv().await {
            Ok(message) => match serde_json::to_string(&message) {
                Ok(line) => emit(line),
                Err(e) => warn!("Failed to render event: {}", e),
            },
            Err(RecvError::Lagged(n)) => {
                warn!(skipped = n, "Event printer lagged behind the bus, events not printed");
                skipped += n;
            }
            Err(RecvError::Closed) => return skipped,
        }
    }
}

async fn run_tail(config: Config, event_type: Option<EventType>) -> Result<()> {
    let client = connect_nats(&config.nats_url).await?;
    let mut subscriber = subscribe_events(&client, &config.subject_prefix, event_type).await?;
    info!(prefix = %config.subject_prefix, "Waiting for events");

    while let Some(message) = subscriber.next().await {
        match ReceivedEvent::from_message(&message) {
            Ok(event) => println!(
                "{} source={} key={} {}",
                event.event_type.as_deref().unwrap_or("?"),
                event.source.as_deref().unwrap_or("?"),
                event.idempotency_key.as_deref().unwrap_or("-"),
                serde_json::to_string(&event.payload)?
            ),
            Err(e) => warn!("{}", e),
        }
    }

    warn!("Subscription closed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use todo_cdc::events::DomainEvent;
    use todo_cdc::records::TodoItem;

    #[tokio::test]
    async fn test_print_events_continues_after_lag() {
        let bus = LocalBus::new(2);
        let rx = bus.subscribe();
        for i in 0..5 {
            let item = TodoItem::new(format!("t{}", i), "x", 1);
            bus.publish(&DomainEvent::created(item)).await.unwrap();
        }
        drop(bus);

        let mut lines = Vec::new();
        let skipped = print_events(rx, |line| lines.push(line)).await;

        assert_eq!(skipped, 3);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("t3"));
        assert!(lines[1].contains("t4"));
    }

    #[tokio::test]
    async fn test_print_events_stops_when_bus_closes() {
        let bus = LocalBus::default();
        let rx = bus.subscribe();
        bus.publish(&DomainEvent::created(TodoItem::new("a", "x", 1)))
            .await
            .unwrap();
        drop(bus);

        let mut lines = Vec::new();
        assert_eq!(print_events(rx, |line| lines.push(line)).await, 0);
        assert_eq!(lines.len(), 1);
    }
}
