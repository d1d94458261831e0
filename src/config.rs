//! Configuration and CLI argument handling

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// How the host is kept awake while a session is live
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum KeepAliveMode {
    /// Block idle and sleep through systemd-inhibit
    Systemd,
    /// Do nothing
    None,
}

/// CLI argument parsing structure
#[derive(Debug, Parser)]
#[command(name = "study-timer")]
#[command(about = "A process-wide study session timer")]
#[command(version)]
pub struct Config {
    /// Port to bind the server to
    #[arg(short, long, default_value = "20554")]
    pub port: u16,

    /// Host address to bind to
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Keep-alive mechanism used while a session is running or paused
    #[arg(short, long, value_enum, default_value_t = KeepAliveMode::Systemd)]
    pub keep_alive: KeepAliveMode,

    /// Append finished sessions to this JSON-lines file instead of keeping them in memory
    #[arg(short, long)]
    pub sessions_file: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Config {
    /// Parse configuration from command line arguments
    pub fn parse() -> Self {
        Parser::parse()
    }

    /// Get the server address as a formatted string
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Get the appropriate log level based on verbose flag
    pub fn log_level(&self) -> &'static str {
        if self.verbose { "debug" } else { "info" }
    }
}
