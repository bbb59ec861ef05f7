//! Fixed-size worker thread pool that runs command logic against the
//! shared store and appends responses to the originating connection's
//! outbox.

use crate::protocol::{self, Command};
use crate::runtime::task::Task;
use crate::storage::Store;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use tracing::{trace, warn};

/// A running pool of worker threads plus the sending half of their task
/// queue. Dropping all clones of the sender (done here by dropping the
/// pool's own `Sender` on `shutdown`) makes every worker's blocking
/// `recv()` return `Err`, which is this implementation's cooperative stop
/// signal; no separate poison-pill value is needed.
pub struct WorkerPool {
    sender: Option<Sender<Task>>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `num_workers` threads sharing one task queue against `store`.
    pub fn new(num_workers: usize, store: Arc<Store>) -> Self {
        let (sender, receiver) = mpsc::channel::<Task>();
        let receiver = Arc::new(Mutex::new(receiver));

        let mut handles = Vec::with_capacity(num_workers);
        for id in 0..num_workers {
            let receiver = Arc::clone(&receiver);
            let store = Arc::clone(&store);
            let handle = thread::Builder::new()
                .name(format!("reactorkv-worker-{id}"))
                .spawn(move || worker_loop(id, receiver, store))
                .expect("failed to spawn worker thread");
            handles.push(handle);
        }

        WorkerPool {
            sender: Some(sender),
            handles,
        }
    }

    /// Submit a task to the pool. The reactor is the only caller.
    pub fn submit(&self, task: Task) {
        if let Some(sender) = &self.sender {
            // A send can only fail if every worker has already exited,
            // which only happens after shutdown; nothing to do but drop
            // the task.
            let _ = sender.send(task);
        }
    }

    /// Close the task queue and join every worker thread.
    pub fn shutdown(mut self) {
        self.sender.take();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(id: usize, receiver: Arc<Mutex<Receiver<Task>>>, store: Arc<Store>) {
    loop {
        let task = {
            let receiver = receiver.lock().unwrap();
            receiver.recv()
        };

        let task = match task {
            Ok(task) => task,
            Err(_) => break, // queue closed: every sender has been dropped
        };

        let Some(connection) = task.connection.upgrade() else {
            trace!(worker = id, "dropping task for reaped connection");
            continue;
        };

        let response = dispatch(&task.command, &store);
        connection.append_response(&response);
        connection
            .busy
            .store(false, std::sync::atomic::Ordering::SeqCst);
        (task.on_complete)();
    }
}

/// Pure command dispatch against the store: `(Command, &Store) -> response`.
pub fn dispatch(command: &Command, store: &Store) -> Vec<u8> {
    match command {
        Command::Get { key } => match store.get(key) {
            Some(value) => protocol::format_value(&value),
            None => protocol::format_error("key not found"),
        },
        Command::Set { key, value } => {
            store.set(key.clone(), value.clone());
            protocol::format_ok()
        }
        Command::Del { key } => {
            if store.del(key) {
                protocol::format_ok()
            } else {
                protocol::format_error("key not found")
            }
        }
        Command::Ping => protocol::format_value(b"Pong"),
        Command::NoOp => {
            warn!("NoOp task reached dispatch; reactor should never enqueue one");
            Vec::new()
        }
    }
}
