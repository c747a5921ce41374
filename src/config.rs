//! Command-line and environment configuration for the probe binary.

use std::time::Duration;

use clap::builder::BoolishValueParser;
use clap::{ArgAction, Args, Parser, Subcommand};
use secrecy::SecretString;

pub const DEFAULT_SEND_INTERVAL_MS: u64 = 20_000;
pub const DEFAULT_PING_URL: &str = "ws://localhost:8010";
pub const DEFAULT_PING_INTERVAL_MS: u64 = 20_000;

#[derive(Parser, Debug)]
#[command(
    name = "ddp-probe",
    about = "Measure chat message latency over a DDP/SockJS connection",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Post a message periodically and report ack and delivery latency
    Latency(LatencyArgs),
    /// Send raw `ping` text frames to a websocket and log what comes back
    Ping(PingArgs),
}

#[derive(Args, Debug)]
pub struct LatencyArgs {
    #[arg(long, env = "HOST_URL", help = "Chat server host, without scheme")]
    pub host: String,

    #[arg(
        long,
        env = "AUTH_TOKEN",
        hide_env_values = true,
        help = "Resume token used to log in"
    )]
    pub auth_token: String,

    #[arg(long, env = "ROOM_ID", help = "Room to post into and subscribe to")]
    pub room_id: String,

    #[arg(
        long,
        env = "SEND_INTERVAL_MS",
        default_value_t = DEFAULT_SEND_INTERVAL_MS,
        value_parser = clap::value_parser!(u64).range(1..),
        help = "Milliseconds between sends"
    )]
    pub send_interval_ms: u64,

    #[arg(
        long,
        env = "DEBUG",
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new(),
        default_value_t = false,
        num_args = 0..=1,
        default_missing_value = "true",
        help = "Log every frame sent and received"
    )]
    pub debug: bool,
}

#[derive(Args, Debug)]
pub struct PingArgs {
    #[arg(long, env = "SERVER_URL", default_value = DEFAULT_PING_URL)]
    pub server_url: String,

    #[arg(
        long,
        env = "INTERVAL_MS",
        default_value_t = DEFAULT_PING_INTERVAL_MS,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub interval_ms: u64,
}

/// Resolved settings for the latency probe.
#[derive(Debug)]
pub struct ProbeConfig {
    pub host: String,
    pub auth_token: SecretString,
    pub room_id: String,
    pub send_interval: Duration,
    pub debug: bool,
}

impl LatencyArgs {
    pub fn into_config(self) -> ProbeConfig {
        ProbeConfig {
            host: self.host,
            auth_token: SecretString::new(self.auth_token),
            room_id: self.room_id,
            send_interval: Duration::from_millis(self.send_interval_ms),
            debug: self.debug,
        }
    }
}

impl PingArgs {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use clap::{CommandFactory, Parser};
    use secrecy::ExposeSecret;

    use super::{Cli, Command, DEFAULT_PING_URL};

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn latency_args_resolve_into_config() {
        let cli = Cli::try_parse_from([
            "ddp-probe",
            "latency",
            "--host",
            "chat.example.com",
            "--auth-token",
            "resume-token",
            "--room-id",
            "GENERAL",
            "--send-interval-ms",
            "500",
            "--debug",
        ])
        .expect("parse");

        let Command::Latency(args) = cli.command else {
            panic!("expected latency subcommand");
        };
        let config = args.into_config();
        assert_eq!(config.host, "chat.example.com");
        assert_eq!(config.auth_token.expose_secret(), "resume-token");
        assert_eq!(config.room_id, "GENERAL");
        assert_eq!(config.send_interval, Duration::from_millis(500));
        assert!(config.debug);
    }

    #[test]
    fn debug_accepts_boolish_values() {
        let cli = Cli::try_parse_from([
            "ddp-probe",
            "latency",
            "--host",
            "h",
            "--auth-token",
            "t",
            "--room-id",
            "r",
            "--debug=false",
        ])
        .expect("parse");

        let Command::Latency(args) = cli.command else {
            panic!("expected latency subcommand");
        };
        assert!(!args.debug);
    }

    #[test]
    fn zero_interval_is_rejected() {
        let result = Cli::try_parse_from([
            "ddp-probe",
            "latency",
            "--host",
            "h",
            "--auth-token",
            "t",
            "--room-id",
            "r",
            "--send-interval-ms",
            "0",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn ping_defaults_apply() {
        let cli = Cli::try_parse_from(["ddp-probe", "ping"]).expect("parse");
        let Command::Ping(args) = cli.command else {
            panic!("expected ping subcommand");
        };
        assert_eq!(args.server_url, DEFAULT_PING_URL);
        assert_eq!(args.interval(), Duration::from_millis(20_000));
    }
}
