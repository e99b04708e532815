//! switchyard demo server.
//!
//! ```text
//!   client ──▶ axum/hyper ──▶ dispatcher ──▶ route registry
//!                                 │
//!            ┌──────────┬─────────┼──────────┬───────────┐
//!            ▼          ▼         ▼          ▼           ▼
//!          RPC        SSE       Blob      Upload     error map
//!        (JSON)   (events)   (bytes out) (bytes in) ("CODE")
//! ```
//!
//! Routes served:
//! - `POST /echo`     echoes the body length and text back as JSON
//! - `POST /ping`     empty reply
//! - `GET  /clock`    one `tick` event per second until the client leaves
//! - `GET  /download` streamed bytes
//! - `POST /upload`   counts uploaded bytes

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use axum::body::Bytes;
use clap::Parser;
use futures_util::StreamExt;
use serde::Serialize;

use switchyard::config::{load_config, ServerConfig};
use switchyard::observability::{logging, metrics};
use switchyard::{Blob, Error, RequestContext, Server};

#[derive(Parser)]
#[command(name = "switchyard")]
#[command(about = "HTTP request-lifecycle demo server", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on, overriding `listener.bind_address`.
    #[arg(short, long)]
    port: Option<u16>,
}

/// Application context shared by every request.
struct Demo {
    started: Instant,
}

#[derive(Serialize)]
struct Echo<'a> {
    length: usize,
    body: &'a str,
}

async fn echo(ctx: RequestContext<Demo>) -> switchyard::Result<Option<serde_json::Value>> {
    let body = ctx.body().unwrap_or_default();
    if body.is_empty() {
        return Err(Error::bad_request());
    }
    let echo = Echo {
        length: body.len(),
        body,
    };
    Ok(Some(serde_json::to_value(echo)?))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ServerConfig::default(),
    };

    logging::init(&config.observability);
    tracing::info!("switchyard v{} starting", env!("CARGO_PKG_VERSION"));

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let demo = Demo {
        started: Instant::now(),
    };

    let server = Server::new(config, demo)
        .rpc("/echo", echo)
        .rpc("/ping", |_ctx| async { Ok(None::<()>) })
        .sse("/clock", |session| async move {
            let mut ticks = tokio::time::interval(Duration::from_secs(1));
            session.on_cleanup(|| tracing::debug!("Clock stream finished"));
            // A disconnect cancels this loop at its next tick.
            while !session.is_closed() {
                ticks.tick().await;
                let uptime = session.app().started.elapsed().as_secs();
                session.emit("tick", &serde_json::json!({ "uptime_secs": uptime }))?;
            }
            Ok::<_, Error>(())
        })
        .blob("/download", |_ctx| async {
            let chunks = futures_util::stream::iter(0..16u8)
                .map(|i| Ok::<_, std::io::Error>(Bytes::from(vec![b'a' + i; 1024])));
            Ok(Blob::stream(chunks))
        })
        .upload("/upload", |ctx, mut stream| async move {
            while stream.next_chunk().await?.is_some() {}
            tracing::info!(
                request_id = %ctx.request_id(),
                bytes = stream.bytes_received(),
                "Upload received"
            );
            Ok::<_, Error>(())
        });

    let on_ready = |addr: SocketAddr| tracing::info!(address = %addr, "Listening for connections");
    match cli.port {
        Some(port) => server.listen_with(port, on_ready).await?,
        None => server.listen_configured(on_ready).await?,
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
