//! Server CLI implementation.
//!
//! Command-line argument parsing for the qdrop session server.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser, ValueEnum};
use qdrop_core::constants::DEFAULT_PORT;

use crate::scheduler::SchedulerConfig;

/// Log output format for CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum CliLogFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// Structured JSON output.
    Json,
}

impl From<CliLogFormat> for qdrop_core::LogFormat {
    fn from(fmt: CliLogFormat) -> Self {
        match fmt {
            CliLogFormat::Text => qdrop_core::LogFormat::Text,
            CliLogFormat::Json => qdrop_core::LogFormat::Json,
        }
    }
}

/// qdrop server - session coordination and transfer relay.
#[derive(Debug, Parser)]
#[command(
    name = "qdrop-server",
    version,
    about = "qdrop server - session coordination and transfer relay"
)]
pub struct Cli {
    /// Address to listen on
    #[arg(short = 'b', long = "bind", default_value = "0.0.0.0")]
    pub bind_addr: IpAddr,

    /// Port to listen on
    #[arg(short = 'p', long = "port", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Session lifetime limit in seconds
    #[arg(
        long = "session-ttl",
        default_value = "14400",
        value_name = "SECONDS",
        env = "QDROP_SESSION_TTL_SECS"
    )]
    pub session_ttl_secs: u64,

    /// Grace period before an empty session is deleted, in seconds
    #[arg(
        long = "empty-grace",
        default_value = "300",
        value_name = "SECONDS",
        env = "QDROP_EMPTY_GRACE_SECS"
    )]
    pub empty_grace_secs: u64,

    /// Interval between expiry sweeps, in seconds
    #[arg(long = "sweep-interval", default_value = "60", value_name = "SECONDS")]
    pub sweep_interval_secs: u64,

    /// Increase verbosity (can be repeated: -v, -vv, -vvv)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,

    /// Log to file instead of stderr
    #[arg(long = "log-file", value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Log output format
    #[arg(long = "log-format", default_value = "text")]
    pub log_format: CliLogFormat,
}

impl Cli {
    /// Get the socket address to bind to.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }

    /// Scheduler timing derived from the flags.
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            ttl: Duration::from_secs(self.session_ttl_secs),
            grace: Duration::from_secs(self.empty_grace_secs),
            sweep_interval: Duration::from_secs(self.sweep_interval_secs),
        }
    }
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            session_ttl_secs: 14_400,
            empty_grace_secs: 300,
            sweep_interval_secs: 60,
            verbose: 0,
            log_file: None,
            log_format: CliLogFormat::Text,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
