use std::path::PathBuf;

use clap::Parser;
use nostr_sdk::prelude::*;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use nostr_relay::{Admission, Error, Filter, NostrEvent, Relay, RelayConfig, ReplaceOutcome};

#[derive(Debug, Parser)]
#[command(name = "relay-stdio")]
#[command(about = "Feed NIP-01 client messages to the relay core over stdin/stdout")]
struct Args {
    /// Durable store directory (overrides RELAY_DB_PATH)
    #[arg(long)]
    db: Option<PathBuf>,

    /// Ephemeral ring slots (overrides RELAY_RING_CAPACITY)
    #[arg(long)]
    ring_capacity: Option<usize>,

    /// Rows per persistent page (overrides RELAY_QUERY_BATCH_SIZE)
    #[arg(long)]
    batch_size: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut config = RelayConfig::from_env()?;
    if let Some(db) = args.db {
        config.db_path = db;
    }
    if let Some(capacity) = args.ring_capacity {
        config.ring_capacity = capacity;
    }
    if let Some(batch_size) = args.batch_size {
        config.query_batch_size = batch_size;
    }

    let relay = Relay::open(&config).await?;

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown signal received");
                shutdown.cancel();
            }
        });
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        let line = tokio::select! {
            biased;

            () = shutdown.cancelled() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }

        for reply in handle_message(&relay, &shutdown, &line).await {
            stdout.write_all(reply.to_string().as_bytes()).await?;
            stdout.write_all(b"\n").await?;
        }
        stdout.flush().await?;
    }

    relay.shutdown()?;
    info!("Relay stopped");
    Ok(())
}

async fn handle_message(relay: &Relay, shutdown: &CancellationToken, line: &str) -> Vec<Value> {
    let message: Vec<Value> = match serde_json::from_str(line) {
        Ok(message) => message,
        Err(err) => return vec![notice(format!("invalid: {err}"))],
    };

    match message.first().and_then(Value::as_str) {
        Some("EVENT") => match message.get(1) {
            Some(raw) => vec![handle_event(relay, raw).await],
            None => vec![notice("invalid: EVENT without payload")],
        },
        Some("REQ") => handle_req(relay, shutdown, &message).await,
        Some(other) => vec![notice(format!("unsupported message type: {other}"))],
        None => vec![notice("invalid: empty message")],
    }
}

async fn handle_event(relay: &Relay, raw: &Value) -> Value {
    let event = match Event::from_json(raw.to_string()) {
        Ok(event) => NostrEvent::from_event(&event),
        Err(err) => return notice(format!("invalid: {err}")),
    };
    let event_id = event.id.clone();

    match relay.on_event(event).await {
        Ok(Admission::Persistent(ReplaceOutcome::Stale)) => {
            json!(["OK", event_id, true, "duplicate: a newer version is already stored"])
        }
        Ok(_) => json!(["OK", event_id, true, ""]),
        Err(Error::ClassificationRejected(kind)) => {
            json!(["OK", event_id, false, format!("blocked: unsupported event kind {kind}")])
        }
        Err(err) => json!(["OK", event_id, false, format!("error: {err}")]),
    }
}

async fn handle_req(relay: &Relay, shutdown: &CancellationToken, message: &[Value]) -> Vec<Value> {
    let Some(subscription) = message.get(1).and_then(Value::as_str) else {
        return vec![notice("invalid: REQ without subscription id")];
    };

    let mut filters = Vec::with_capacity(message.len().saturating_sub(2));
    for raw in &message[2..] {
        match Filter::from_json_value(raw.clone()) {
            Ok(filter) => filters.push(filter),
            Err(err) => {
                warn!(subscription, error = %err, "Rejected malformed filter");
                return vec![json!(["CLOSED", subscription, format!("invalid: {err}")])];
            }
        }
    }

    let cancel = shutdown.child_token();
    let events = match relay.on_query(&cancel, &filters).await {
        Ok(events) => events,
        Err(err) => return vec![json!(["CLOSED", subscription, format!("error: {err}")])],
    };

    let mut replies: Vec<Value> = events
        .iter()
        .map(|event| json!(["EVENT", subscription, event.to_json_value()]))
        .collect();
    replies.push(json!(["EOSE", subscription]));
    replies
}

fn notice(message: impl Into<String>) -> Value {
    json!(["NOTICE", message.into()])
}
