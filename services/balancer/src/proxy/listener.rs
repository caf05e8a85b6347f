//! Per-service TCP listener and byte shuttles.
//!
//! Each active service owns exactly one listener bound to its listen
//! port and routed to one backend. Accepted connections get an outbound
//! connection to that backend and two shuttles copy bytes in both
//! directions, incrementing the service-level and backend-level
//! counters chunk by chunk:
//! - downstream→upstream counts as `bytes_out`
//! - upstream→downstream counts as `bytes_in`
//!
//! The accept loop runs in a spawned task; terminating the handle stops
//! new accepts immediately while in-flight shuttles run to natural
//! completion.

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpSocket, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, Instrument};

use crate::stats::ByteCounters;

/// Connect timeout for the outbound (upstream) connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Shuttle copy buffer size.
const COPY_BUF_SIZE: usize = 8192;

/// Handle to a running listener task.
pub struct ListenerHandle {
    /// Monotonic listener generation, unique per process.
    pub id: u64,
    /// Address the listener is bound to.
    pub local_addr: SocketAddr,
    task: JoinHandle<()>,
}

impl ListenerHandle {
    /// Port the listener is bound to.
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Stop accepting and release the listening socket.
    ///
    /// Waits for the accept task to finish so the port is free for an
    /// immediate rebind. In-flight connections are detached and keep
    /// running.
    pub async fn shutdown(self) {
        self.task.abort();
        let _ = self.task.await;
    }
}

/// Bind a listener for `service` on `listen_port` routed to `upstream`.
pub async fn spawn_listener(
    service: String,
    listen_port: u16,
    upstream: SocketAddr,
    service_counters: Arc<ByteCounters>,
    backend_counters: Arc<ByteCounters>,
    id: u64,
) -> io::Result<ListenerHandle> {
    let bind_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, listen_port));

    // SO_REUSEADDR lets a rotation rebind the port while old connections
    // linger in TIME_WAIT.
    let socket = TcpSocket::new_v4()?;
    socket.set_reuseaddr(true)?;
    socket.bind(bind_addr)?;
    let listener = socket.listen(1024)?;
    let local_addr = listener.local_addr()?;

    info!(
        service = %service,
        bind_addr = %local_addr,
        upstream = %upstream,
        listener_id = id,
        "Listener bound"
    );

    let task = tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((client, peer_addr)) => {
                    let service_counters = Arc::clone(&service_counters);
                    let backend_counters = Arc::clone(&backend_counters);
                    let span =
                        tracing::info_span!("connection", service = %service, peer = %peer_addr);
                    tokio::spawn(
                        handle_connection(client, upstream, service_counters, backend_counters)
                            .instrument(span),
                    );
                }
                Err(e) => {
                    error!(service = %service, error = %e, "Accept error");
                    // Brief sleep to avoid a tight loop on persistent errors
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    });

    Ok(ListenerHandle {
        id,
        local_addr,
        task,
    })
}

/// Connect upstream and shuttle bytes until either side closes.
///
/// An upstream connect failure closes the accepted connection and never
/// touches the listener.
async fn handle_connection(
    mut client: TcpStream,
    upstream_addr: SocketAddr,
    service_counters: Arc<ByteCounters>,
    backend_counters: Arc<ByteCounters>,
) {
    let mut upstream = match timeout(DEFAULT_CONNECT_TIMEOUT, TcpStream::connect(upstream_addr)).await
    {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            debug!(upstream = %upstream_addr, error = %e, "Upstream connect failed");
            return;
        }
        Err(_) => {
            debug!(upstream = %upstream_addr, "Upstream connect timed out");
            return;
        }
    };

    let (bytes_out, bytes_in) =
        shuttle(&mut client, &mut upstream, &service_counters, &backend_counters).await;

    debug!(
        upstream = %upstream_addr,
        bytes_out,
        bytes_in,
        "Connection closed"
    );
}

/// Copy bytes in both directions, counting each chunk as it moves.
///
/// Returns `(bytes_out, bytes_in)`.
async fn shuttle(
    client: &mut TcpStream,
    upstream: &mut TcpStream,
    service_counters: &ByteCounters,
    backend_counters: &ByteCounters,
) -> (u64, u64) {
    let (mut client_read, mut client_write) = client.split();
    let (mut upstream_read, mut upstream_write) = upstream.split();

    let downstream_to_upstream = async {
        let mut total = 0u64;
        let mut buf = vec![0u8; COPY_BUF_SIZE];
        loop {
            match client_read.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    upstream_write.write_all(&buf[..n]).await?;
                    service_counters.add_out(n as u64);
                    backend_counters.add_out(n as u64);
                    total += n as u64;
                }
                Err(e) => return Err(e),
            }
        }
        upstream_write.shutdown().await?;
        Ok(total)
    };

    let upstream_to_downstream = async {
        let mut total = 0u64;
        let mut buf = vec![0u8; COPY_BUF_SIZE];
        loop {
            match upstream_read.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    client_write.write_all(&buf[..n]).await?;
                    service_counters.add_in(n as u64);
                    backend_counters.add_in(n as u64);
                    total += n as u64;
                }
                Err(e) => return Err(e),
            }
        }
        client_write.shutdown().await?;
        Ok(total)
    };

    let (out_result, in_result): (io::Result<u64>, io::Result<u64>) =
        tokio::join!(downstream_to_upstream, upstream_to_downstream);

    // A reset on one half is normal teardown; report what was moved.
    (out_result.unwrap_or(0), in_result.unwrap_or(0))
}
