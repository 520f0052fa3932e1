//! CLI for spoutbridge
//!
//! Subcommands:
//! - `config`: print the resolved configuration
//! - `demo`: run the spout against the in-process broker

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use spoutbridge::config::{Settings, load_config};
use spoutbridge::consumer::MemoryBroker;
use spoutbridge::spout::{ChannelCollector, RedeliverySpout, Spout, SpoutContext};
use spoutbridge::utils::logging;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "spoutbridge")]
enum Command {
    /// Print the resolved configuration as JSON
    Config,
    /// Publish messages to an in-process broker and drive the spout like a host would
    Demo {
        /// Number of messages to publish
        #[arg(long, default_value_t = 10)]
        messages: usize,
        /// Fail every N-th emitted tuple (0 acks everything)
        #[arg(long, default_value_t = 3)]
        fail_every: usize,
    },
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cmd = Command::parse();

    let settings = match load_config() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return;
        }
    };
    logging::init(&settings.logging.level);

    match cmd {
        Command::Config => match serde_json::to_string_pretty(&settings) {
            Ok(json) => println!("{json}"),
            Err(e) => error!("Failed to render configuration: {}", e),
        },
        Command::Demo {
            messages,
            fail_every,
        } => {
            if let Err(e) = run_demo(settings, messages, fail_every).await {
                error!("Demo failed: {}", e);
            }
        }
    }
}

async fn run_demo(
    settings: Settings,
    messages: usize,
    fail_every: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let broker = MemoryBroker::new();
    let (collector, mut emitted) = ChannelCollector::new();
    let topic = settings.broker.topic.clone();
    let tag = settings
        .broker
        .topic_tag
        .split("||")
        .map(str::trim)
        .find(|t| !t.is_empty() && *t != "*")
        .map(str::to_string);

    let spout = Arc::new(RedeliverySpout::new(
        broker.clone(),
        settings.broker,
        Arc::new(collector),
    ));
    spout.open(&SpoutContext { task_id: 1 })?;

    // the host's pull loop
    let puller = {
        let spout = spout.clone();
        tokio::spawn(async move {
            while !spout.is_closed() {
                spout.next_tuple().await;
            }
        })
    };

    for i in 0..messages {
        broker.publish(&topic, tag.as_deref(), format!("event-{i}"));
    }

    let max_emissions = messages.saturating_mul(10);
    let mut seen = 0usize;
    while seen < max_emissions {
        let Ok(Some(tuple)) = tokio::time::timeout(Duration::from_millis(500), emitted.recv()).await
        else {
            break;
        };
        seen += 1;
        if fail_every > 0 && seen % fail_every == 0 {
            info!(
                msg_id = %tuple.msg_id,
                failure_times = tuple.tuple.stat.failure_times(),
                "Host failed tuple"
            );
            spout.fail(&tuple.msg_id).await;
        } else {
            info!(
                msg_id = %tuple.msg_id,
                elapsed_ms = tuple.tuple.stat.elapsed_ms(),
                "Host acked tuple"
            );
            spout.ack(&tuple.msg_id);
        }
    }

    info!(
        emitted = seen,
        pending = spout.pending_failures(),
        "Demo finished, closing spout"
    );
    spout.close();
    puller.await?;
    Ok(())
}
