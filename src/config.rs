//! Configuration: one optional positional CLI argument (the listen port).
//!
//! Worker count and buffer sizing are internal constants rather than
//! CLI-configurable, since the external interface contract exposes nothing
//! beyond the port. Log level is controlled the ambient way, through
//! `RUST_LOG`, not a flag.

use clap::Parser;

const DEFAULT_PORT: u16 = 12345;

/// Number of worker threads executing command logic against the store.
pub const DEFAULT_WORKERS: usize = 5;

#[derive(Parser, Debug)]
#[command(name = "reactorkv")]
#[command(about = "A concurrent in-memory key-value server", long_about = None)]
struct CliArgs {
    /// TCP port to listen on
    port: Option<u16>,
}

/// Fully resolved server configuration.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    pub port: u16,
    pub workers: usize,
}

impl Config {
    /// Parse CLI arguments into a resolved configuration.
    pub fn load() -> Self {
        let cli = CliArgs::parse();
        Config {
            port: cli.port.unwrap_or(DEFAULT_PORT),
            workers: DEFAULT_WORKERS,
        }
    }
}
