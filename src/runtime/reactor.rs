//! The reactor: single-threaded owner of the listening socket, the poll
//! set, and the map of live connections. Pairs with the worker pool via a
//! task queue, a waker, and a dirty set.

use crate::config::Config;
use crate::protocol::{self, Command};
use crate::runtime::connection::{ConnError, Connection};
use crate::runtime::dirty::DirtySet;
use crate::runtime::task::Task;
use crate::runtime::waker::Waker as ReactorWaker;
use crate::runtime::worker::WorkerPool;
use crate::storage::Store;
use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token};
use signal_hook::consts::SIGINT;
use signal_hook::iterator::Signals;
use slab::Slab;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, info, warn};

const WAKER_TOKEN: Token = Token(0);
const LISTENER_TOKEN: Token = Token(1);
/// Client tokens start past the two reserved tokens above.
const TOKEN_OFFSET: usize = 2;

fn client_token(slab_key: usize) -> Token {
    Token(slab_key + TOKEN_OFFSET)
}

fn slab_key(token: Token) -> usize {
    token.0 - TOKEN_OFFSET
}

/// Bundles the handles a connection event needs beyond its own state, so
/// they don't have to be threaded through every helper individually.
struct Ctx<'a> {
    registry: &'a mio::Registry,
    pool: &'a WorkerPool,
    waker: &'a ReactorWaker,
    dirty: &'a Arc<DirtySet>,
}

/// Run the reactor + worker pool until SIGINT requests a clean shutdown.
pub fn run(config: Config, store: Arc<Store>) -> io::Result<()> {
    // Ignoring SIGPIPE process-wide is the portable stand-in for passing
    // MSG_NOSIGNAL/SO_NOSIGPIPE on every send, which std::io::Write over a
    // TcpStream has no way to request directly.
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port)
        .parse()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, format!("{e}")))?;

    let mut poll = Poll::new()?;
    let mut events = Events::with_capacity(1024);

    // An owned clone of the registry lets `Ctx` hold onto it across
    // `poll.poll(&mut events, ...)` calls without fighting the borrow
    // checker over `poll` itself.
    let registry = poll.registry().try_clone()?;

    let mut listener = TcpListener::bind(addr)?;
    registry.register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;

    let waker = ReactorWaker::new(&registry, WAKER_TOKEN)?;
    let running = Arc::new(AtomicBool::new(true));
    let dirty = Arc::new(DirtySet::new());

    spawn_signal_thread(Arc::clone(&running), waker.clone());

    let pool = WorkerPool::new(config.workers, Arc::clone(&store));
    let mut connections: Slab<Arc<Connection>> = Slab::new();

    let ctx = Ctx {
        registry: &registry,
        pool: &pool,
        waker: &waker,
        dirty: &dirty,
    };

    info!(port = config.port, workers = config.workers, "reactor listening");

    loop {
        apply_dirty(&connections, &ctx);

        poll.poll(&mut events, None)?;

        if !running.load(Ordering::SeqCst) {
            break;
        }

        for event in events.iter() {
            match event.token() {
                WAKER_TOKEN => {
                    waker.clear();
                }
                LISTENER_TOKEN => {
                    accept_connections(&listener, &mut connections, &registry);
                }
                token => {
                    let key = slab_key(token);
                    let Some(conn) = connections.get(key).cloned() else {
                        continue;
                    };

                    if event.is_readable() && !handle_readable(token, &conn, &ctx) {
                        reap(&mut connections, key, &registry);
                        continue;
                    }

                    if connections.contains(key) && event.is_writable() {
                        if !handle_writable(token, &conn, &ctx) {
                            reap(&mut connections, key, &registry);
                            continue;
                        }
                    }

                    if connections.contains(key) && event.is_error() {
                        reap(&mut connections, key, &registry);
                    }
                }
            }
        }
    }

    shutdown(listener, &registry, connections, pool);
    Ok(())
}

fn spawn_signal_thread(running: Arc<AtomicBool>, waker: ReactorWaker) {
    thread::Builder::new()
        .name("reactorkv-sigint".into())
        .spawn(move || {
            let mut signals = match Signals::new([SIGINT]) {
                Ok(s) => s,
                Err(e) => {
                    warn!(error = %e, "failed to install SIGINT handler");
                    return;
                }
            };
            if signals.forever().next().is_some() {
                running.store(false, Ordering::SeqCst);
                let _ = waker.notify();
            }
        })
        .expect("failed to spawn signal-handling thread");
}

fn accept_connections(
    listener: &TcpListener,
    connections: &mut Slab<Arc<Connection>>,
    registry: &mio::Registry,
) {
    loop {
        match listener.accept() {
            Ok((stream, peer)) => {
                let entry = connections.vacant_entry();
                let token = client_token(entry.key());
                let conn = Arc::new(Connection::new(stream, peer));
                if let Err(e) = conn.register(registry, token, Interest::READABLE) {
                    warn!(error = %e, "failed to register new connection");
                    continue;
                }
                entry.insert(conn);
                debug!(peer = %peer, "accepted connection");
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) => {
                warn!(error = %e, "accept failed");
                break;
            }
        }
    }
}

/// Drain as many buffered lines as the connection's inbox currently holds,
/// dispatching at most one real command to the worker pool; the reactor
/// withholds further parsing until that task's completion clears `busy`,
/// which is what keeps responses on one connection in request order across
/// a multi-worker pool.
fn pump(token: Token, conn: &Arc<Connection>, ctx: &Ctx) {
    if conn.busy.load(Ordering::SeqCst) {
        return;
    }

    loop {
        let Some(line) = conn.try_get_line() else {
            break;
        };

        match protocol::parse(&line) {
            Ok(Command::NoOp) => continue,
            Ok(command) => {
                conn.busy.store(true, Ordering::SeqCst);

                let dirty = Arc::clone(ctx.dirty);
                let waker = ctx.waker.clone();

                ctx.pool.submit(Task {
                    connection: Arc::downgrade(conn),
                    command,
                    on_complete: Box::new(move || {
                        dirty.mark(token);
                        let _ = waker.notify();
                    }),
                });
                break;
            }
            Err(e) => {
                conn.append_response(&protocol::format_error(&e.0));
                let _ = conn.reregister(ctx.registry, token, Interest::READABLE | Interest::WRITABLE);
            }
        }
    }
}

/// Returns `false` iff the connection should be reaped.
fn handle_readable(token: Token, conn: &Arc<Connection>, ctx: &Ctx) -> bool {
    match conn.read_to_inbox() {
        Ok(true) => {
            pump(token, conn, ctx);
            true
        }
        Ok(false) => false, // EOF
        Err(ConnError::Overflow(_)) => {
            conn.append_response(&protocol::format_error("value too large"));
            let _ = conn.reregister(ctx.registry, token, Interest::READABLE | Interest::WRITABLE);
            true
        }
        Err(ConnError::Io(e)) => {
            debug!(error = %e, "connection read error");
            false
        }
    }
}

/// Returns `false` iff the connection should be reaped.
fn handle_writable(token: Token, conn: &Arc<Connection>, ctx: &Ctx) -> bool {
    match conn.write_from_outbox() {
        Ok(true) => true, // bytes remain, keep WRITABLE interest
        Ok(false) => {
            let _ = conn.reregister(ctx.registry, token, Interest::READABLE);
            true
        }
        Err(ConnError::Io(e)) => {
            debug!(error = %e, "connection write error");
            false
        }
        Err(ConnError::Overflow(_)) => unreachable!("writes never overflow"),
    }
}

/// Re-enable write interest for every connection a worker appended a
/// response to, and resume parsing any lines that were left buffered
/// behind a now-completed task; this is what lets a pipelined batch of
/// commands on one connection keep draining without a fresh readable
/// event.
fn apply_dirty(connections: &Slab<Arc<Connection>>, ctx: &Ctx) {
    for token in ctx.dirty.drain() {
        let key = slab_key(token);
        if let Some(conn) = connections.get(key) {
            let _ = conn.reregister(ctx.registry, token, Interest::READABLE | Interest::WRITABLE);
            pump(token, conn, ctx);
        }
    }
}

/// O(1) removal: `Slab::remove` frees the key directly, unlike the manual
/// swap-with-back bookkeeping a raw `poll(2)` array would need.
fn reap(connections: &mut Slab<Arc<Connection>>, key: usize, registry: &mio::Registry) {
    if connections.contains(key) {
        let conn = connections.remove(key);
        let _ = conn.deregister(registry);
        debug!(peer = %conn.peer, "reaped connection");
    }
}

fn shutdown(
    mut listener: TcpListener,
    registry: &mio::Registry,
    connections: Slab<Arc<Connection>>,
    pool: WorkerPool,
) {
    info!("shutting down");
    let _ = registry.deregister(&mut listener);
    drop(listener);

    for (_, conn) in connections.into_iter() {
        let _ = conn.deregister(registry);
    }

    pool.shutdown();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::dirty::DirtySet;
    use std::net::{TcpListener as StdTcpListener, TcpStream as StdTcpStream};

    /// Regression test for the reactor's task-submission path holding only
    /// a weak reference: the `Task` built alongside a submitted command
    /// must not let its `on_complete` closure capture a strong
    /// `Arc<Connection>`, or a reaped connection's socket would stay open
    /// until the task runs and a dead-peer task would stop being a no-op.
    #[test]
    fn test_task_completion_holds_no_strong_connection_ref() {
        let listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = StdTcpStream::connect(addr).unwrap();
        let (server, peer) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();
        let conn = Arc::new(Connection::new(
            mio::net::TcpStream::from_std(server),
            peer,
        ));

        let poll = Poll::new().unwrap();
        let registry = poll.registry().try_clone().unwrap();
        let waker = ReactorWaker::new(&registry, WAKER_TOKEN).unwrap();
        let dirty = Arc::new(DirtySet::new());

        // Build the same Task shape pump() submits: a Weak<Connection> and
        // an on_complete closure capturing only the dirty set and waker,
        // never the connection itself.
        let task = Task {
            connection: Arc::downgrade(&conn),
            command: Command::Ping,
            on_complete: Box::new(move || {
                dirty.mark(client_token(0));
                let _ = waker.notify();
            }),
        };

        assert_eq!(Arc::strong_count(&conn), 1);

        // Once the reactor's own handle is dropped (simulating a reap),
        // the task's weak reference must fail to upgrade rather than keep
        // the connection alive until it runs.
        drop(conn);
        drop(client);
        assert!(task.connection.upgrade().is_none());
    }
}
