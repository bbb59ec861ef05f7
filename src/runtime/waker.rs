//! Cross-thread nudge used by workers to break the reactor out of its poll
//! wait once a connection's outbox has gone from empty to non-empty.
//!
//! The original self-pipe design (write a byte, read drains until
//! `EAGAIN`) is replaced here by `mio::Waker`, the primitive mio ships for
//! exactly this purpose: it is registered in the same `Poll` as every
//! other source, coalesces repeated wakes into one readiness event, and is
//! drained by mio itself once that event is delivered.

use mio::{Registry, Token};
use std::io;
use std::sync::Arc;

/// Wraps `mio::Waker` behind a clonable handle so both the signal-handling
/// thread and every worker thread can hold one.
#[derive(Clone)]
pub struct Waker {
    inner: Arc<mio::Waker>,
}

impl Waker {
    pub fn new(registry: &Registry, token: Token) -> io::Result<Self> {
        Ok(Waker {
            inner: Arc::new(mio::Waker::new(registry, token)?),
        })
    }

    /// Wake the reactor's poll call. Non-blocking; safe to call from any
    /// thread, including a signal-handling thread.
    pub fn notify(&self) -> io::Result<()> {
        self.inner.wake()
    }

    /// No-op: mio drains the underlying eventfd/kqueue user event itself
    /// once the wake is delivered as a readiness event. Kept so callers
    /// written against the documented contract still have something to
    /// call after observing the waker token.
    pub fn clear(&self) {}
}
