//! A unit of deferred work: a command to run against the store, plus a weak
//! reference to the connection that asked for it.

use crate::protocol::Command;
use crate::runtime::connection::Connection;
use std::sync::Weak;

/// Dispatched by the reactor, consumed by a worker, dropped after
/// execution. Holding only a `Weak<Connection>` means a connection reaped
/// while its task is queued makes that task's completion a cheap no-op
/// instead of writing into a dead socket.
pub struct Task {
    pub connection: Weak<Connection>,
    pub command: Command,
    /// Invoked by the worker after a successful dispatch: marks the
    /// connection's token dirty and pokes the waker so the reactor resumes
    /// write interest on it.
    pub on_complete: Box<dyn FnOnce() + Send>,
}
