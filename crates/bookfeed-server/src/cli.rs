//! Command-line interface.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use bookfeed_core::{TracingConfig, TracingOutputFormat};
use clap::{Parser, ValueEnum};
use tracing::Level;

use crate::config::{DEFAULT_LISTEN, ServerConfig};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Pretty,
    Compact,
    Json,
}

/// Serve booking-portal appointments as an iCalendar feed.
#[derive(Debug, Parser)]
#[command(name = "bookfeed-server")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Address to listen on
    #[arg(long, short, env = "BOOKFEED_LISTEN", default_value = DEFAULT_LISTEN)]
    pub listen: SocketAddr,

    /// Path to booking.toml (default: ~/.config/bookfeed/booking.toml)
    #[arg(long, short, env = "BOOKFEED_CONFIG")]
    pub config: Option<PathBuf>,

    /// Read the booking configuration from this key-value store instead
    #[arg(long, env = "BOOKFEED_REMOTE_CONFIG_URL")]
    pub remote_config_url: Option<String>,

    /// Bearer token for the key-value store
    #[arg(long, env = "BOOKFEED_REMOTE_CONFIG_TOKEN", hide_env_values = true)]
    pub remote_config_token: Option<String>,

    /// Page fetch timeout in seconds
    #[arg(long, env = "BOOKFEED_FETCH_TIMEOUT", default_value = "90")]
    pub fetch_timeout: u64,

    /// Enable debug logging
    #[arg(long, short = 'v')]
    pub debug: bool,

    /// Log output format
    #[arg(long, value_enum, default_value = "pretty")]
    pub log_format: LogFormat,
}

impl Cli {
    /// Collects the server settings.
    pub fn server_config(&self) -> ServerConfig {
        let mut config = ServerConfig::new(self.listen)
            .with_fetch_timeout(Duration::from_secs(self.fetch_timeout));
        if let Some(ref path) = self.config {
            config = config.with_config_path(path);
        }
        if let Some(ref url) = self.remote_config_url {
            config = config.with_remote_config(url, self.remote_config_token.clone());
        }
        config
    }

    /// Collects the logging settings.
    pub fn tracing_config(&self) -> TracingConfig {
        let format = match self.log_format {
            LogFormat::Pretty => TracingOutputFormat::Pretty,
            LogFormat::Compact => TracingOutputFormat::Compact,
            LogFormat::Json => TracingOutputFormat::Json,
        };
        let base = if self.log_format == LogFormat::Json {
            TracingConfig::server()
        } else {
            TracingConfig::default()
        };
        let level = if self.debug { Level::DEBUG } else { Level::INFO };
        base.with_format(format).with_level(level)
    }
}
