//! mio event loop implementation.
//!
//! Readiness-based model: poll tells us when sockets are ready,
//! then we perform non-blocking read/write syscalls.
//! Uses epoll on Linux, kqueue on macOS.
//!
//! ## Failure Isolation
//!
//! Every connection event is processed under `catch_unwind`. An error or a
//! panic closes only the connection it happened on and is reported to the
//! `ErrorSink`; the worker keeps serving its other connections.

use crate::clock::SystemClock;
use crate::config::Config;
use crate::protocols::websocket::WsError;
use crate::runtime::connection::{Connection, ConnectionRegistry, ProcessResult};
use crate::runtime::sink::{panic_message, ConnectionReport, ErrorSink};
use bytes::{Buf, BytesMut};
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

const LISTENER_TOKEN: Token = Token(usize::MAX);

/// Events processed per poll call.
const EVENTS_CAPACITY: usize = 1024;

/// Size of each socket read.
const READ_CHUNK: usize = 16 * 1024;

/// Poll timeout, which is also how often idle connections are swept.
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Queued output at which a connection stops reading from its socket.
///
/// Reading resumes once writes bring the queue back under the mark, so a
/// client that does not read its replies stalls only itself.
const OUTBOUND_HIGH_WATER: usize = 256 * 1024;

/// Per-worker connection state for mio backend.
struct MioConnection {
    stream: TcpStream,
    peer: SocketAddr,
    conn: Connection,
    /// Bytes received but not yet consumed by the protocol.
    inbound: BytesMut,
    /// Bytes produced but not yet accepted by the socket.
    outbound: BytesMut,
    /// Registered for writable events because `outbound` is non-empty.
    wants_write: bool,
    /// Close once `outbound` drains.
    close_after_flush: bool,
    /// Reads stopped at `OUTBOUND_HIGH_WATER`; resume after writing.
    read_paused: bool,
    last_active: Instant,
}

impl MioConnection {
    fn new(stream: TcpStream, peer: SocketAddr, max_frame_size: usize) -> Self {
        Self {
            stream,
            peer,
            conn: Connection::new(max_frame_size, SystemClock),
            inbound: BytesMut::with_capacity(READ_CHUNK),
            outbound: BytesMut::new(),
            wants_write: false,
            close_after_flush: false,
            read_paused: false,
            last_active: Instant::now(),
        }
    }
}

/// What to do with a connection after handling an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Close,
}

/// Settings each worker needs from the configuration.
#[derive(Debug, Clone, Copy)]
struct WorkerSettings {
    max_connections: usize,
    max_frame_size: usize,
    idle_timeout: Option<Duration>,
}

impl From<&Config> for WorkerSettings {
    fn from(config: &Config) -> Self {
        Self {
            max_connections: config.max_connections,
            max_frame_size: config.max_frame_size,
            idle_timeout: config.idle_timeout,
        }
    }
}

/// Run the mio-based server.
pub fn run(config: Config, sink: Arc<dyn ErrorSink>) -> io::Result<()> {
    let num_workers = if config.workers == 0 {
        num_cpus()
    } else {
        config.workers
    };

    let addr: SocketAddr = config
        .listen
        .parse()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    info!(workers = num_workers, addr = %addr, "Starting mio runtime");

    let settings = WorkerSettings::from(&config);
    let mut handles = Vec::with_capacity(num_workers);

    for worker_id in 0..num_workers {
        // Bind here so a bad address fails startup instead of a worker
        let listener = create_listener_with_reuseport(addr)?;
        let sink = Arc::clone(&sink);

        let handle = thread::Builder::new()
            .name(format!("worker-{worker_id}"))
            .spawn(move || {
                if let Err(e) = worker_loop(worker_id, listener, settings, sink.as_ref()) {
                    error!(worker = worker_id, error = %e, "Worker failed");
                }
            })?;

        handles.push(handle);
    }

    // Wait for all workers
    for handle in handles {
        let _ = handle.join();
    }

    Ok(())
}

fn worker_loop(
    worker_id: usize,
    listener: std::net::TcpListener,
    settings: WorkerSettings,
    sink: &dyn ErrorSink,
) -> io::Result<()> {
    let mut poll = Poll::new()?;
    let mut events = Events::with_capacity(EVENTS_CAPACITY);

    listener.set_nonblocking(true)?;
    let mut listener = TcpListener::from_std(listener);
    poll.registry()
        .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;

    let mut connections: ConnectionRegistry<MioConnection> =
        ConnectionRegistry::new(settings.max_connections);

    info!(
        worker = worker_id,
        max_connections = settings.max_connections,
        max_frame_size = settings.max_frame_size,
        "Worker started"
    );

    loop {
        match poll.poll(&mut events, Some(SWEEP_INTERVAL)) {
            Ok(()) => {}
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }

        for event in events.iter() {
            match event.token() {
                LISTENER_TOKEN => {
                    accept_connections(&listener, &poll, &mut connections, &settings, worker_id, sink);
                }
                Token(conn_id) => {
                    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                        handle_connection_event(conn_id, event, &mut poll, &mut connections)
                    }));

                    let failure = match outcome {
                        Ok(Ok(Flow::Continue)) => continue,
                        Ok(Ok(Flow::Close)) => None,
                        Ok(Err(e)) => Some(Ok(e)),
                        Err(payload) => Some(Err(panic_message(&*payload))),
                    };

                    let peer = connections.get(conn_id).map(|c| c.peer);
                    match failure {
                        Some(Ok(e)) => sink.connection_failed(&ConnectionReport {
                            conn_id,
                            peer,
                            error: &e,
                        }),
                        Some(Err(message)) => sink.defect(conn_id, peer, &message),
                        None => {}
                    }
                    close_connection(&mut poll, &mut connections, conn_id);
                }
            }
        }

        if let Some(timeout) = settings.idle_timeout {
            sweep_idle(&mut poll, &mut connections, timeout, sink);
        }
    }
}

fn accept_connections(
    listener: &TcpListener,
    poll: &Poll,
    connections: &mut ConnectionRegistry<MioConnection>,
    settings: &WorkerSettings,
    worker_id: usize,
    sink: &dyn ErrorSink,
) {
    loop {
        match listener.accept() {
            Ok((stream, peer)) => {
                if connections.is_full() {
                    warn!(peer = %peer, "Connection limit reached");
                    continue;
                }

                if let Some(conn_id) = admit(stream, peer, poll, connections, settings, sink) {
                    debug!(worker = worker_id, conn_id, peer = %peer, "Accepted connection");
                }
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) => {
                error!("Accept error: {}", e);
                break;
            }
        }
    }
}

/// Add an accepted stream to the registry and the poller.
///
/// A registration failure drops only this connection and is reported to the
/// sink.
fn admit(
    stream: TcpStream,
    peer: SocketAddr,
    poll: &Poll,
    connections: &mut ConnectionRegistry<MioConnection>,
    settings: &WorkerSettings,
    sink: &dyn ErrorSink,
) -> Option<usize> {
    let conn_id = connections.insert(MioConnection::new(stream, peer, settings.max_frame_size))?;

    // Re-borrow after insert
    let registered = connections.get_mut(conn_id).map(|conn| {
        poll.registry()
            .register(&mut conn.stream, Token(conn_id), Interest::READABLE)
    })?;

    if let Err(e) = registered {
        connections.remove(conn_id);
        let error = WsError::from(e);
        sink.connection_failed(&ConnectionReport {
            conn_id,
            peer: Some(peer),
            error: &error,
        });
        return None;
    }

    Some(conn_id)
}

fn handle_connection_event(
    conn_id: usize,
    event: &mio::event::Event,
    poll: &mut Poll,
    connections: &mut ConnectionRegistry<MioConnection>,
) -> Result<Flow, WsError> {
    let Some(conn) = connections.get_mut(conn_id) else {
        return Ok(Flow::Continue);
    };

    let readable = event.is_readable();
    loop {
        if readable || conn.read_paused {
            conn.read_paused = false;
            if handle_readable(conn)? == Flow::Close {
                return Ok(Flow::Close);
            }
        }

        if flush(conn_id, conn, poll)? == Flow::Close {
            return Ok(Flow::Close);
        }

        // Writes made room; pick up the input left in the socket. The
        // readable edge for it has already been consumed.
        if conn.read_paused && conn.outbound.len() < OUTBOUND_HIGH_WATER {
            continue;
        }

        return Ok(Flow::Continue);
    }
}

/// Read the socket one chunk at a time, running the protocol after each.
///
/// Stops when the socket would block, or early when `outbound` reaches
/// `OUTBOUND_HIGH_WATER`. In the latter case the rest stays in the kernel
/// buffer, which in turn throttles the client.
fn handle_readable(conn: &mut MioConnection) -> Result<Flow, WsError> {
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        if conn.outbound.len() >= OUTBOUND_HIGH_WATER {
            trace!(peer = %conn.peer, queued = conn.outbound.len(), "Output backed up, pausing reads");
            conn.read_paused = true;
            return Ok(Flow::Continue);
        }

        let n = match conn.stream.read(&mut chunk) {
            Ok(0) => {
                trace!(peer = %conn.peer, "Connection closed by client");
                let _ = write_pending(conn);
                conn.conn.close();
                return Ok(Flow::Close);
            }
            Ok(n) => n,
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(Flow::Continue),
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        conn.last_active = Instant::now();

        // Final response queued; anything further from the client is dropped
        if conn.close_after_flush {
            continue;
        }

        conn.inbound.extend_from_slice(&chunk[..n]);
        match conn.conn.process(&mut conn.inbound, &mut conn.outbound) {
            Ok(ProcessResult::Close) => conn.close_after_flush = true,
            Ok(result) => trace!(?result, buffered = conn.inbound.len(), "Processed input"),
            Err(e) => {
                // Best effort: the client may still read the final response
                let _ = write_pending(conn);
                return Err(e);
            }
        }
    }
}

/// Write as much pending output as the socket accepts.
///
/// Returns `true` once `outbound` is empty.
fn write_pending(conn: &mut MioConnection) -> io::Result<bool> {
    while !conn.outbound.is_empty() {
        match conn.stream.write(&conn.outbound) {
            Ok(0) => return Err(io::Error::new(io::ErrorKind::WriteZero, "write returned 0")),
            Ok(n) => conn.outbound.advance(n),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(true)
}

fn flush(conn_id: usize, conn: &mut MioConnection, poll: &mut Poll) -> Result<Flow, WsError> {
    let drained = write_pending(conn)?;

    if drained && conn.close_after_flush {
        return Ok(Flow::Close);
    }

    // Only touch the registration when interest actually changes
    if drained == conn.wants_write {
        let interest = if drained {
            Interest::READABLE
        } else {
            Interest::READABLE | Interest::WRITABLE
        };
        poll.registry()
            .reregister(&mut conn.stream, Token(conn_id), interest)?;
        conn.wants_write = !drained;
    }

    Ok(Flow::Continue)
}

fn sweep_idle(
    poll: &mut Poll,
    connections: &mut ConnectionRegistry<MioConnection>,
    timeout: Duration,
    sink: &dyn ErrorSink,
) {
    let idle: Vec<(usize, SocketAddr)> = connections
        .iter()
        .filter(|(_, c)| c.last_active.elapsed() >= timeout)
        .map(|(id, c)| (id, c.peer))
        .collect();

    for (conn_id, peer) in idle {
        let error = WsError::Transport(io::Error::new(io::ErrorKind::TimedOut, "idle timeout"));
        sink.connection_failed(&ConnectionReport {
            conn_id,
            peer: Some(peer),
            error: &error,
        });
        close_connection(poll, connections, conn_id);
    }
}

fn close_connection(poll: &mut Poll, connections: &mut ConnectionRegistry<MioConnection>, conn_id: usize) {
    if let Some(mut conn) = connections.remove(conn_id) {
        let session = conn.conn.session_state();
        conn.conn.close();
        let _ = poll.registry().deregister(&mut conn.stream);
        debug!(conn_id, peer = %conn.peer, ?session, "Connection closed");
    }
}

/// Create a TCP listener with SO_REUSEPORT for kernel load balancing.
fn create_listener_with_reuseport(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_port(true)?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;

    Ok(socket.into())
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
