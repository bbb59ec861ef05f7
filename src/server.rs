//! Top-level server: owns the configuration and the shared store, and
//! hands both to the reactor.

use crate::config::Config;
use crate::runtime::reactor;
use crate::storage::Store;
use std::io;
use std::sync::Arc;

pub struct Server {
    config: Config,
    store: Arc<Store>,
}

impl Server {
    pub fn new(config: Config) -> Self {
        Server {
            config,
            store: Arc::new(Store::new()),
        }
    }

    /// Run until a SIGINT requests a clean shutdown.
    pub fn run(self) -> io::Result<()> {
        reactor::run(self.config, self.store)
    }

    /// Expose the store for testing.
    #[cfg(test)]
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }
}
