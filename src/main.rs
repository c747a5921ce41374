use std::error::Error;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use clap::Parser;
use serde_json::Value;
use tokio::time::{self, Interval, MissedTickBehavior};
use tracing::{info, warn};

use ddp_probe::config::{Cli, Command, ProbeConfig};
use ddp_probe::ids;
use ddp_probe::latency::{LatencyHarness, Phase};
use ddp_probe::ping::run_ping;
use ddp_probe::stream::client::{DdpClient, DdpConnection, ROOM_MESSAGES_STREAM};
use ddp_probe::telemetry::init_tracing;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    match cli.command {
        Command::Latency(args) => {
            let config = args.into_config();
            init_tracing(config.debug);
            run_latency(config).await
        }
        Command::Ping(args) => {
            init_tracing(false);
            let summary = run_ping(&args.server_url, args.interval()).await?;
            info!(event = "ping_finished", sent = summary.sent, received = summary.received);
            Ok(())
        }
    }
}

async fn run_latency(config: ProbeConfig) -> Result<(), Box<dyn Error>> {
    let mut connection = DdpClient::new(&config.host).connect()?;
    let login = connection.login(&config.auth_token).await?;
    info!(event = "probe_started", user_id = %login.user_id, room_id = %config.room_id);

    let harness = LatencyHarness::with_reporter(|record| println!("{}", record.to_csv_line()));

    let deliveries = harness.clone();
    connection.subscribe_stream(ROOM_MESSAGES_STREAM, &config.room_id, move |data: Value| {
        if let Some(message_id) = data.get("_id").and_then(Value::as_str) {
            deliveries.mark_pending(message_id, Phase::Deliver);
        }
    })?;

    let connection = Arc::new(connection);
    let room_id: Arc<str> = Arc::from(config.room_id.as_str());
    let mut ticker = send_ticker(config.send_interval);

    let closed = connection.closed();
    tokio::pin!(closed);

    loop {
        tokio::select! {
            reason = &mut closed => {
                let reason = reason?;
                warn!(event = "probe_stopped", reason = ?reason);
                return Ok(());
            }
            _ = ticker.tick() => {
                tokio::spawn(send_probe_message(
                    Arc::clone(&connection),
                    harness.clone(),
                    Arc::clone(&room_id),
                ));
            }
        }
    }
}

async fn send_probe_message(connection: Arc<DdpConnection>, harness: LatencyHarness, room_id: Arc<str>) {
    let message_id = ids::random_id();
    let text = format!("random simple message {message_id} - {}", epoch_millis());

    harness.mark(&message_id, Phase::Issue);
    match connection
        .send_chat_message(message_id.as_str(), &*room_id, text)
        .await
    {
        Ok(_) => {
            harness.mark_pending(&message_id, Phase::Ack);
        }
        Err(err) => {
            warn!(event = "probe_send_failed", message_id = %message_id, error = %err);
            harness.discard(&message_id);
        }
    }
}

/// Ticks immediately, then once per `period`.
fn send_ticker(period: Duration) -> Interval {
    let mut ticker = time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

fn epoch_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::Instant;

    use super::send_ticker;

    #[tokio::test(start_paused = true)]
    async fn first_send_fires_without_waiting_an_interval() {
        let start = Instant::now();
        let mut ticker = send_ticker(Duration::from_secs(20));

        ticker.tick().await;
        assert_eq!(Instant::now(), start);

        ticker.tick().await;
        assert_eq!(Instant::now() - start, Duration::from_secs(20));
    }
}
