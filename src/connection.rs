//! Per-connection state and the read/write state machine.
//!
//! A connection owns one socket and one receive buffer. It performs at
//! most one accumulate-and-dispatch cycle: [`read_frame`] assembles
//! exactly one frame, the handler runs once, and the handler owns any
//! further I/O on the socket. Reads suspend only at the event loop; the
//! shared cancellation token aborts them at any suspend point.
//!
//! Ownership is shared: the spawned read task and the handler hold the
//! same `Arc<Connection>`, and the connection is freed once the last
//! clone drops.
//!
//! [`read_frame`]: Connection::read_frame

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

use crate::error::{FramelinkError, Result};
use crate::protocol::FrameAssembler;

/// One accepted connection.
///
/// Created by the admission loop; handlers receive it as an
/// `Arc<Connection>`.
pub struct Connection {
    /// Monotonically increasing id, unique for the server's lifetime.
    id: u64,
    /// Peer address, captured at accept time.
    peer: SocketAddr,
    /// Read half, held by the single read pipeline.
    reader: AsyncMutex<OwnedReadHalf>,
    /// Write half. The fair async lock serializes concurrent
    /// `send_frame` calls so writes never interleave.
    writer: AsyncMutex<OwnedWriteHalf>,
    /// Payload of the completed frame; empty until `FrameReady`.
    payload: Mutex<Bytes>,
    /// Maximum accepted declared frame length.
    max_frame_len: u32,
}

impl Connection {
    /// Wrap an accepted stream.
    pub fn new(id: u64, stream: TcpStream, peer: SocketAddr, max_frame_len: u32) -> Arc<Self> {
        debug!(id, %peer, "new connection");
        let (reader, writer) = stream.into_split();
        Arc::new(Self {
            id,
            peer,
            reader: AsyncMutex::new(reader),
            writer: AsyncMutex::new(writer),
            payload: Mutex::new(Bytes::new()),
            max_frame_len,
        })
    }

    /// Connection id.
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Peer address.
    #[inline]
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Assemble exactly one frame from the socket.
    ///
    /// Repeatedly issues a read sized by the codec's progress function
    /// until a full frame (prefix + declared payload) is buffered, then
    /// stores the payload for [`payload`](Self::payload) /
    /// [`payload_as_text`](Self::payload_as_text).
    ///
    /// Prefix bytes are always read before payload bytes; there is no
    /// reordering within a connection.
    ///
    /// # Errors
    ///
    /// - [`FramelinkError::Cancelled`] when the shared token fires at
    ///   any suspend point.
    /// - [`FramelinkError::ConnectionClosed`] when the peer disconnects
    ///   mid-frame.
    /// - [`FramelinkError::Protocol`] when the declared length exceeds
    ///   the configured maximum.
    /// - [`FramelinkError::Io`] for any other transport error.
    pub async fn read_frame(&self, cancel: &CancellationToken) -> Result<()> {
        let mut reader = self.reader.lock().await;
        let mut assembler = FrameAssembler::with_max_frame_len(self.max_frame_len);

        loop {
            let needed = assembler.bytes_needed()?;
            if needed == 0 {
                break;
            }

            let mut chunk = vec![0u8; needed];
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(FramelinkError::Cancelled);
                }
                result = reader.read_exact(&mut chunk) => match result {
                    Ok(_) => assembler.extend_from_slice(&chunk),
                    Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                        return Err(FramelinkError::ConnectionClosed);
                    }
                    Err(e) => return Err(e.into()),
                }
            }

            trace!(id = self.id, buffered = assembler.len(), "read progress");
        }

        let payload = assembler.take_payload();
        debug!(id = self.id, len = payload.len(), "frame assembled");
        *self.lock_payload() = payload;
        Ok(())
    }

    /// Encode and write one full reply frame.
    ///
    /// Writes are serialized per connection; a `send_frame` issued while
    /// another is in flight waits its turn. Completion and failure are
    /// logged only - per the protocol's propagation policy, nothing is
    /// surfaced to the caller and there is no retry.
    pub async fn send_frame(&self, payload: &[u8]) {
        let frame = crate::protocol::encode(payload);
        let mut writer = self.writer.lock().await;
        match write_all_flush(&mut writer, &frame).await {
            Ok(()) => debug!(id = self.id, len = payload.len(), "frame written"),
            Err(e) => error!(id = self.id, "write error: {e}"),
        }
    }

    /// Payload of the completed frame (cheap clone).
    ///
    /// Empty until a full frame has been assembled.
    pub fn payload(&self) -> Bytes {
        self.lock_payload().clone()
    }

    /// Payload reinterpreted as text (lossy UTF-8).
    ///
    /// Empty until a full frame has been assembled.
    pub fn payload_as_text(&self) -> String {
        String::from_utf8_lossy(&self.payload()).into_owned()
    }

    fn lock_payload(&self) -> std::sync::MutexGuard<'_, Bytes> {
        self.payload.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        debug!(id = self.id, "connection dropped");
    }
}

async fn write_all_flush(writer: &mut OwnedWriteHalf, frame: &[u8]) -> std::io::Result<()> {
    writer.write_all(frame).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{encode, DEFAULT_MAX_FRAME_LEN};
    use tokio::net::TcpListener;

    async fn connected_pair() -> (TcpStream, Arc<Connection>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (stream, peer) = listener.accept().await.unwrap();
        (client, Connection::new(7, stream, peer, DEFAULT_MAX_FRAME_LEN))
    }

    #[tokio::test]
    async fn test_read_frame_assembles_payload() {
        let (mut client, conn) = connected_pair().await;
        client.write_all(&encode(b"hello")).await.unwrap();

        let cancel = CancellationToken::new();
        conn.read_frame(&cancel).await.unwrap();

        assert_eq!(&conn.payload()[..], b"hello");
        assert_eq!(conn.payload_as_text(), "hello");
    }

    #[tokio::test]
    async fn test_read_frame_fragmented_delivery() {
        let (mut client, conn) = connected_pair().await;
        let frame = encode(b"fragmented");

        let writer = tokio::spawn(async move {
            for byte in frame {
                client.write_all(&[byte]).await.unwrap();
                tokio::time::sleep(std::time::Duration::from_millis(1)).await;
            }
            client
        });

        let cancel = CancellationToken::new();
        conn.read_frame(&cancel).await.unwrap();
        assert_eq!(conn.payload_as_text(), "fragmented");

        let _ = writer.await;
    }

    #[tokio::test]
    async fn test_payload_empty_before_frame_ready() {
        let (_client, conn) = connected_pair().await;
        assert!(conn.payload().is_empty());
        assert_eq!(conn.payload_as_text(), "");
    }

    #[tokio::test]
    async fn test_read_frame_cancelled() {
        let (_client, conn) = connected_pair().await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = conn.read_frame(&cancel).await.unwrap_err();
        assert!(matches!(err, FramelinkError::Cancelled));
        assert!(conn.payload().is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_mid_frame() {
        let (mut client, conn) = connected_pair().await;
        // Prefix promising 10 bytes, then disconnect.
        client.write_all(&[0, 0, 0, 10]).await.unwrap();
        drop(client);

        let err = conn.read_frame(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, FramelinkError::ConnectionClosed));
        assert!(conn.payload().is_empty());
    }

    #[tokio::test]
    async fn test_oversized_declaration_aborts_read() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let mut client = TcpStream::connect(addr).await.unwrap();
        let (stream, peer) = listener.accept().await.unwrap();
        let conn = Connection::new(1, stream, peer, 16);

        client.write_all(&encode(&[0u8; 64])).await.unwrap();

        let err = conn.read_frame(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, FramelinkError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_send_frame_writes_prefix_and_payload() {
        let (mut client, conn) = connected_pair().await;
        conn.send_frame(b"pong").await;

        let mut buf = [0u8; 8];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf[..4], &[0, 0, 0, 4]);
        assert_eq!(&buf[4..], b"pong");
    }

    #[tokio::test]
    async fn test_send_frame_empty_payload() {
        let (mut client, conn) = connected_pair().await;
        conn.send_frame(b"").await;

        let mut buf = [0u8; 4];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [0, 0, 0, 0]);
    }

    #[tokio::test]
    async fn test_read_then_reply_cycle() {
        let (mut client, conn) = connected_pair().await;
        client.write_all(&encode(b"ping")).await.unwrap();

        conn.read_frame(&CancellationToken::new()).await.unwrap();
        assert_eq!(conn.payload_as_text(), "ping");
        conn.send_frame(b"pong").await;

        let mut buf = [0u8; 8];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf[4..], b"pong");
    }
}
