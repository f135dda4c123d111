//! Tokio-based server.
//!
//! Alternative to the mio event loop: a current-thread runtime with one
//! task per connection. Each connection is driven by the same
//! `Connection` state machine as the mio backend.

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::protocols::websocket::WsError;
use crate::runtime::sink::{panic_message, ConnectionReport, ErrorSink};
use crate::runtime::{Connection, ProcessResult};
use bytes::BytesMut;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, trace};

/// Read buffer size
const BUFFER_SIZE: usize = 16 * 1024;

/// Server instance
pub struct Server {
    config: Config,
    sink: Arc<dyn ErrorSink>,
    connection_limit: Arc<Semaphore>,
}

impl Server {
    /// Create a new server instance
    pub fn new(config: Config, sink: Arc<dyn ErrorSink>) -> Self {
        let connection_limit = Arc::new(Semaphore::new(config.max_connections));
        Server {
            config,
            sink,
            connection_limit,
        }
    }

    /// Bind the configured address and serve until the listener fails.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(&self.config.listen).await?;
        info!(address = %self.config.listen, "Server listening");
        self.serve(listener).await
    }

    /// Accept connections from `listener`.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), Box<dyn std::error::Error>> {
        let mut next_id: usize = 0;

        loop {
            // Wait for a connection slot
            let permit = self.connection_limit.clone().acquire_owned().await?;

            match listener.accept().await {
                Ok((stream, peer)) => {
                    let conn_id = next_id;
                    next_id = next_id.wrapping_add(1);
                    debug!(conn_id, peer = %peer, "New connection");

                    let conn = Connection::new(self.config.max_frame_size, SystemClock);
                    let idle_timeout = self.config.idle_timeout;
                    let sink = Arc::clone(&self.sink);

                    tokio::spawn(async move {
                        // Inner task so a panic surfaces as a JoinError here
                        let handler = tokio::spawn(handle_connection(stream, conn, idle_timeout));
                        match handler.await {
                            Ok(Ok(())) => debug!(conn_id, "Connection closed"),
                            Ok(Err(e)) => sink.connection_failed(&ConnectionReport {
                                conn_id,
                                peer: Some(peer),
                                error: &e,
                            }),
                            Err(e) if e.is_panic() => {
                                sink.defect(conn_id, Some(peer), &panic_message(&*e.into_panic()))
                            }
                            Err(e) => debug!(conn_id, error = %e, "Connection task cancelled"),
                        }
                        drop(permit);
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }
}

/// Handle a single client connection until it closes.
///
/// Output produced alongside an error (e.g. a `400` for a bad upgrade) is
/// written before the error is returned.
pub async fn handle_connection<S, C>(
    mut stream: S,
    mut conn: Connection<C>,
    idle_timeout: Option<Duration>,
) -> Result<(), WsError>
where
    S: AsyncRead + AsyncWrite + Unpin,
    C: Clock + Clone,
{
    let mut inbound = BytesMut::with_capacity(BUFFER_SIZE);
    let mut outbound = BytesMut::with_capacity(BUFFER_SIZE);

    loop {
        let n = match idle_timeout {
            Some(limit) => tokio::time::timeout(limit, stream.read_buf(&mut inbound))
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "idle timeout"))??,
            None => stream.read_buf(&mut inbound).await?,
        };

        if n == 0 {
            trace!("Connection closed by client");
            conn.close();
            return Ok(());
        }

        let result = conn.process(&mut inbound, &mut outbound);

        if !outbound.is_empty() {
            stream.write_all(&outbound).await?;
            outbound.clear();
        }

        if result? == ProcessResult::Close {
            let _ = stream.shutdown().await;
            return Ok(());
        }
    }
}

/// Run `server` on a single-threaded tokio runtime.
pub fn run(config: Config, sink: Arc<dyn ErrorSink>) -> Result<(), Box<dyn std::error::Error>> {
    info!("Using tokio runtime (current thread)");
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let server = Server::new(config, sink);
    runtime.block_on(server.run())
}
