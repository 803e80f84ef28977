//! Echo server - binds a fixed port and echoes each frame back.
//!
//! Ctrl-C triggers the cooperative shutdown: in-flight reads are
//! cancelled, the admission window is retired, and `bind_wait` returns
//! once every worker thread has exited.
//!
//! ```text
//! RUST_LOG=debug cargo run --bin echo_server
//! printf '\x00\x00\x00\x04ping' | nc localhost 2001
//! ```

use std::sync::Arc;

use framelink::{Connection, HandlerResult, Server};
use tracing_subscriber::EnvFilter;

async fn echo(conn: Arc<Connection>) -> HandlerResult {
    tracing::debug!(id = conn.id(), text = %conn.payload_as_text(), "frame received");
    conn.send_frame(&conn.payload()).await;
    Ok(())
}

fn main() -> framelink::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!("start ...");

    let server = Arc::new(Server::new());

    // Signal wiring lives outside the core: a side thread waits for
    // Ctrl-C and fires the cooperative shutdown.
    let closer = Arc::clone(&server);
    std::thread::spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_io()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                tracing::error!("signal listener failed: {e}");
                return;
            }
        };
        runtime.block_on(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("stopping ...");
                closer.close();
            }
        });
    });

    server.bind_wait(2001, echo, 2)?;

    tracing::info!("... stop");
    Ok(())
}
