//! # framelink
//!
//! Minimal multithreaded TCP server with a length-prefixed binary
//! framing protocol.
//!
//! ## Architecture
//!
//! - **Protocol**: pure codec for `[u32 BE length][payload]` frames,
//!   plus a frame assembler for fragmented reads
//! - **Connection**: one socket, one receive buffer; assembles exactly
//!   one frame, then hands it to the handler, which may reply with the
//!   same framing
//! - **Admission loop**: a fixed window of outstanding accepts; every
//!   completed accept spawns a connection pipeline and re-arms itself
//! - **Server**: listener + worker pool + shared cancellation signal,
//!   with a bind/wait/close lifecycle
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use framelink::{Connection, HandlerResult, Server};
//!
//! async fn pong(conn: Arc<Connection>) -> HandlerResult {
//!     if conn.payload_as_text() == "ping" {
//!         conn.send_frame(b"pong").await;
//!     }
//!     Ok(())
//! }
//!
//! fn main() -> framelink::Result<()> {
//!     let server = Server::new();
//!     server.bind_wait(2001, pong, 2)
//! }
//! ```

pub mod protocol;

mod admission;
mod connection;
mod error;
mod handler;
mod server;

pub use connection::Connection;
pub use error::{FramelinkError, Result};
pub use handler::{BoxFuture, FrameHandler, HandlerResult};
pub use server::{Server, ServerConfig};
