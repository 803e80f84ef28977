//! Server lifecycle: bind, wait, close.
//!
//! The server owns the listening socket, a dedicated multi-thread
//! runtime (the worker pool driving one shared event loop), and the
//! shared cancellation signal. It is an explicitly constructed value -
//! tests run independent instances side by side - with the lifecycle
//! `Unbound → Bound → Closing → Unbound`, re-bindable.
//!
//! Two tokens separate the two halves of shutdown: the broadcast
//! read-cancel token aborts every in-flight read, while the shutdown
//! token retires the admission slots (closing the listener once the
//! last slot drops its handle). In-flight accepts are never aborted by
//! the read-cancel token.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::net::TcpListener;
use tokio::runtime::{Builder, Runtime};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::admission;
use crate::error::Result;
use crate::handler::FrameHandler;
use crate::protocol::DEFAULT_MAX_FRAME_LEN;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Maximum accepted declared frame length in bytes.
    ///
    /// Default: 16 MiB. A frame declaring more is a protocol error and
    /// the connection is abandoned before any payload is buffered.
    pub max_frame_len: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

/// A framed TCP server.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use framelink::{Connection, HandlerResult, Server};
///
/// async fn pong(conn: Arc<Connection>) -> HandlerResult {
///     conn.send_frame(b"pong").await;
///     Ok(())
/// }
///
/// fn main() -> framelink::Result<()> {
///     let server = Server::new();
///     server.bind_wait(2001, pong, 2)
/// }
/// ```
pub struct Server {
    config: ServerConfig,
    /// Connection ids are strictly increasing for the server's
    /// lifetime, across rebinds.
    next_conn_id: Arc<AtomicU64>,
    shared: Mutex<Shared>,
}

struct Shared {
    bound: Option<Bound>,
    /// Broadcast read-cancellation, re-armed on each bind.
    cancel: CancellationToken,
    /// Listener shutdown, re-armed on each bind.
    shutdown: CancellationToken,
}

struct Bound {
    runtime: Runtime,
    slots: Vec<JoinHandle<()>>,
    local_addr: SocketAddr,
}

impl Server {
    /// Create an unbound server with default configuration.
    pub fn new() -> Self {
        Self::with_config(ServerConfig::default())
    }

    /// Create an unbound server with the given configuration.
    pub fn with_config(config: ServerConfig) -> Self {
        Self {
            config,
            next_conn_id: Arc::new(AtomicU64::new(0)),
            shared: Mutex::new(Shared {
                bound: None,
                cancel: CancellationToken::new(),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Bind the listener and open the admission window.
    ///
    /// Starts `worker_count` worker threads (clamped to at least 1)
    /// driving one shared event loop, and keeps `worker_count` accept
    /// operations outstanding on the listener. If the server is already
    /// bound, the previous incarnation is closed first (idempotent
    /// rebind). Port 0 binds an OS-assigned port; see
    /// [`local_addr`](Self::local_addr).
    ///
    /// # Errors
    ///
    /// Only listener/runtime creation failures surface here (e.g. the
    /// port is in use). Everything after a successful bind is reported
    /// through the log stream.
    pub fn bind<H>(&self, port: u16, handler: H, worker_count: usize) -> Result<()>
    where
        H: FrameHandler,
    {
        self.bind_shared(port, Arc::new(handler), worker_count)
    }

    /// [`bind`](Self::bind) followed by [`wait`](Self::wait).
    pub fn bind_wait<H>(&self, port: u16, handler: H, worker_count: usize) -> Result<()>
    where
        H: FrameHandler,
    {
        self.bind(port, handler, worker_count)?;
        self.wait();
        Ok(())
    }

    fn bind_shared(
        &self,
        port: u16,
        handler: Arc<dyn FrameHandler>,
        worker_count: usize,
    ) -> Result<()> {
        // Idempotent rebind: retire the previous incarnation before the
        // new listener competes for the port.
        self.close();
        let previous = self.lock().bound.take();
        if let Some(old) = previous {
            shutdown_bound(old);
        }

        let worker_count = worker_count.max(1);
        let runtime = Builder::new_multi_thread()
            .worker_threads(worker_count)
            .thread_name("framelink-worker")
            .enable_all()
            .build()?;

        let listener =
            runtime.block_on(TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)))?;
        let local_addr = listener.local_addr()?;
        let listener = Arc::new(listener);

        let cancel = CancellationToken::new();
        let shutdown = CancellationToken::new();

        let slots = (0..worker_count)
            .map(|slot| {
                runtime.spawn(admission::slot_loop(
                    slot,
                    Arc::clone(&listener),
                    Arc::clone(&self.next_conn_id),
                    Arc::clone(&handler),
                    cancel.clone(),
                    shutdown.clone(),
                    self.config.max_frame_len,
                ))
            })
            .collect();

        info!(%local_addr, worker_count, "server bound");

        let mut shared = self.lock();
        shared.bound = Some(Bound {
            runtime,
            slots,
            local_addr,
        });
        shared.cancel = cancel;
        shared.shutdown = shutdown;
        Ok(())
    }

    /// Block the calling thread until every worker thread has exited.
    ///
    /// Parks until [`close`](Self::close) fires, joins the admission
    /// slots, then tears down the runtime (which joins its worker
    /// threads). Returns immediately when the server is not bound. This
    /// is the only blocking join in the design.
    pub fn wait(&self) {
        let (bound, shutdown) = {
            let mut shared = self.lock();
            (shared.bound.take(), shared.shutdown.clone())
        };
        let Some(Bound { runtime, slots, .. }) = bound else {
            return;
        };

        runtime.block_on(async move {
            shutdown.cancelled().await;
            for slot in slots {
                let _ = slot.await;
            }
        });

        // Dropping the runtime joins its worker threads.
        drop(runtime);
        debug!("workers joined");
    }

    /// Stop accepting and cancel every in-flight read.
    ///
    /// Broadcasts cancellation to all reads registered against the
    /// shared token and retires the admission slots, tearing down the
    /// listener. In-flight accepts are not aborted by the read token;
    /// they end with the listener. Idempotent: a second `close` is a
    /// no-op.
    pub fn close(&self) {
        let shared = self.lock();
        if shared.bound.is_some() && !shared.shutdown.is_cancelled() {
            info!("closing server");
        }
        shared.cancel.cancel();
        shared.shutdown.cancel();
    }

    /// [`close`](Self::close) followed by [`wait`](Self::wait).
    pub fn close_wait(&self) {
        self.close();
        self.wait();
    }

    /// Address the listener is bound to, while bound.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.lock().bound.as_ref().map(|b| b.local_addr)
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

/// Retire a previous incarnation during rebind. The tokens were already
/// cancelled; dropping the runtime joins its workers and frees the
/// port.
fn shutdown_bound(bound: Bound) {
    drop(bound.runtime);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Connection;
    use crate::handler::HandlerResult;

    async fn noop(_conn: Arc<Connection>) -> HandlerResult {
        Ok(())
    }

    #[test]
    fn test_bind_reports_local_addr() {
        let server = Server::new();
        assert!(server.local_addr().is_none());

        server.bind(0, noop, 2).unwrap();
        let addr = server.local_addr().unwrap();
        assert!(addr.port() > 0);

        server.close_wait();
        assert!(server.local_addr().is_none());
    }

    #[test]
    fn test_wait_without_bind_returns() {
        let server = Server::new();
        server.wait();
    }

    #[test]
    fn test_close_without_bind_is_noop() {
        let server = Server::new();
        server.close();
        server.close();
    }

    #[test]
    fn test_worker_count_clamped_to_one() {
        let server = Server::new();
        server.bind(0, noop, 0).unwrap();
        assert!(server.local_addr().is_some());
        server.close_wait();
    }

    #[test]
    fn test_rebind_replaces_listener() {
        let server = Server::new();
        server.bind(0, noop, 1).unwrap();
        let first = server.local_addr().unwrap();

        // Rebinding on the same port proves the old listener was torn
        // down first; bind closes the previous incarnation itself.
        server.bind(first.port(), noop, 1).unwrap();
        assert_eq!(server.local_addr().unwrap().port(), first.port());

        server.close_wait();
    }

    #[test]
    fn test_config_default_max_frame_len() {
        let config = ServerConfig::default();
        assert_eq!(config.max_frame_len, DEFAULT_MAX_FRAME_LEN);
    }
}
