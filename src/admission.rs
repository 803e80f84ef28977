//! Admission control - a fixed window of outstanding accepts.
//!
//! Each admission slot is one task keeping exactly one accept operation
//! outstanding on the shared listener. A completed accept spawns the
//! connection's read pipeline and the slot loops straight back into
//! `accept`, so the outstanding-accept count stays constant while the
//! server is open.
//!
//! A transport error on accept retires the slot without replacement:
//! the admission window permanently shrinks by one. Listener shutdown
//! retires slots silently - that is the expected close path, not an
//! error.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::connection::Connection;
use crate::error::FramelinkError;
use crate::handler::FrameHandler;

/// Drive one admission slot until it is retired.
///
/// `cancel` is the broadcast read-cancellation token handed to every
/// accepted connection; it never aborts the accept itself. Accepts stop
/// only through `shutdown`, which models closing the listener.
pub(crate) async fn slot_loop(
    slot: usize,
    listener: Arc<TcpListener>,
    next_id: Arc<AtomicU64>,
    handler: Arc<dyn FrameHandler>,
    cancel: CancellationToken,
    shutdown: CancellationToken,
    max_frame_len: u32,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                debug!(slot, "admission slot retired");
                return;
            }
            result = listener.accept() => match result {
                Ok((stream, peer)) => {
                    let id = next_id.fetch_add(1, Ordering::Relaxed);
                    debug!(slot, id, %peer, "connection accepted");
                    let conn = Connection::new(id, stream, peer, max_frame_len);
                    tokio::spawn(drive(conn, cancel.clone(), Arc::clone(&handler)));
                    // Falling through re-arms this slot with a fresh accept.
                }
                Err(e) => {
                    // The slot is not re-armed; the window shrinks by one.
                    error!(slot, "accept error: {e}");
                    return;
                }
            }
        }
    }
}

/// One connection's pipeline: assemble a frame, then dispatch it.
///
/// All failures are terminal for this connection and handled here by
/// logging; the handler runs only on a fully assembled frame, at most
/// once.
async fn drive(conn: Arc<Connection>, cancel: CancellationToken, handler: Arc<dyn FrameHandler>) {
    match conn.read_frame(&cancel).await {
        Ok(()) => {
            if let Err(e) = handler.on_frame(Arc::clone(&conn)).await {
                error!(id = conn.id(), "handler error: {e}");
            }
        }
        Err(FramelinkError::Cancelled) => {
            debug!(id = conn.id(), "read cancelled by shutdown");
        }
        Err(e) => {
            error!(id = conn.id(), "read error: {e}");
        }
    }
}
