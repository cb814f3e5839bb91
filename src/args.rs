use clap::{Parser, Subcommand};
use dapmux::config::ServerConfig;
use log::LevelFilter;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file (default: $HOME/.config/dapmux/config.toml)
    #[clap(long, env = "DAPMUX_CONFIG")]
    pub config: Option<PathBuf>,

    /// Address to listen on, overrides `server.host`
    #[clap(long)]
    pub host: Option<String>,

    /// Port to listen on, overrides `server.port`
    #[clap(long)]
    pub port: Option<u16>,

    /// Log level (off, error, warn, info, debug, trace), overrides `server.log_level`
    #[clap(long)]
    pub log_level: Option<LevelFilter>,

    /// Write logs into this file instead of stderr.
    #[clap(long)]
    pub log_file: Option<PathBuf>,

    /// Trace JSON-RPC traffic into the log file.
    /// Requires --log-file.
    #[clap(long)]
    pub trace_rpc: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Start the tool-call server
    Serve,
    /// Print the tool catalog as JSON
    Tools,
    /// Print configured launch configurations
    Configurations,
}

impl Args {
    /// Level used until the configuration file is read.
    pub fn startup_log_level(&self) -> LevelFilter {
        self.log_level.unwrap_or(ServerConfig::default().log_level())
    }

    /// Apply command line overrides on top of the configuration file.
    pub fn apply(&self, server: &mut ServerConfig) {
        if let Some(host) = &self.host {
            server.host = host.clone();
        }
        if let Some(port) = self.port {
            server.port = port;
        }
        if let Some(level) = self.log_level {
            server.log_level = level.to_string().to_lowercase();
        }
    }
}
