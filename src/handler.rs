//! Handler seam - the callback invoked once per framed connection.
//!
//! The server treats the handler as an opaque collaborator: it is called
//! after a connection has assembled exactly one complete frame, and it
//! may reply on that connection using the same framing.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use framelink::{Connection, HandlerResult};
//!
//! async fn pong(conn: Arc<Connection>) -> HandlerResult {
//!     if conn.payload_as_text() == "ping" {
//!         conn.send_frame(b"pong").await;
//!     }
//!     Ok(())
//! }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::connection::Connection;
use crate::error::Result;

/// Result type for handler functions.
pub type HandlerResult = Result<()>;

/// Boxed future for handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Trait for connection handlers.
///
/// Invoked exactly once per successfully framed connection, and only
/// after the full frame (prefix + exactly the declared payload bytes)
/// is assembled. The handler may call [`Connection::send_frame`] zero
/// or more times before returning, and may retain the `Arc<Connection>`
/// beyond the call at its own risk with respect to the connection
/// lifetime rules.
///
/// Any worker thread may run the handler, so implementations must be
/// thread-safe with respect to shared state. Errors are logged at the
/// dispatch boundary; they never crash the server and never delay the
/// next accept.
pub trait FrameHandler: Send + Sync + 'static {
    /// Handle one completed frame.
    fn on_frame(&self, conn: Arc<Connection>) -> BoxFuture<'static, HandlerResult>;
}

impl<F, Fut> FrameHandler for F
where
    F: Fn(Arc<Connection>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn on_frame(&self, conn: Arc<Connection>) -> BoxFuture<'static, HandlerResult> {
        Box::pin((self)(conn))
    }
}
