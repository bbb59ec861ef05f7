//! reactorkv: a concurrent in-memory key-value server reachable over a
//! line-oriented TCP text protocol (GET/SET/DEL/PING).
//!
//! The core is a reactor/worker-pool hybrid: one thread multiplexes all
//! socket I/O, a fixed pool of worker threads runs command logic against
//! the shared store, and a waker plus a dirty set let workers ask the
//! reactor to resume writing on a connection.

use reactorkv::config::Config;
use reactorkv::server::Server;
use tracing_subscriber::EnvFilter;

fn main() {
    let config = Config::load();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    tracing::info!(port = config.port, workers = config.workers, "starting reactorkv");

    let server = Server::new(config);
    if let Err(e) = server.run() {
        tracing::error!(error = %e, "server exited with error");
        std::process::exit(1);
    }
}
