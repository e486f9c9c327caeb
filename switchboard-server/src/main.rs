//! Switchboard server binary.
//!
//! Serves registered databases over newline-delimited JSON-RPC on TCP.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tracing::{info, warn};

use switchboard_server::{jsonrpc, Server};

#[derive(Parser)]
#[command(name = "switchboard-server")]
#[command(about = "JSON-RPC server for Switchboard databases")]
struct Args {
    /// Paths to database schema documents to serve
    #[arg(required = true)]
    schemas: Vec<PathBuf>,

    /// Port to listen on
    #[arg(short, long, default_value = "6640")]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("switchboard_server=info".parse()?),
        )
        .init();

    let args = Args::parse();

    let server = Arc::new(Server::new());
    for path in &args.schemas {
        let document = std::fs::read_to_string(path)
            .with_context(|| format!("reading schema {}", path.display()))?;
        let document: serde_json::Value = serde_json::from_str(&document)
            .with_context(|| format!("parsing schema {}", path.display()))?;
        server
            .register(document)
            .with_context(|| format!("registering schema {}", path.display()))?;
    }
    info!(databases = ?server.databases(), "serving databases");

    let listener = TcpListener::bind((args.host.as_str(), args.port))
        .await
        .with_context(|| format!("binding {}:{}", args.host, args.port))?;
    info!(host = %args.host, port = args.port, "listening");

    loop {
        let (socket, peer) = listener.accept().await.context("accepting connection")?;
        info!(%peer, "session opened");
        let server = server.clone();
        tokio::spawn(async move {
            if let Err(error) = serve_session(server, socket).await {
                warn!(%peer, %error, "session ended with error");
            } else {
                info!(%peer, "session closed");
            }
        });
    }
}

/// Serve one client session: one JSON-RPC request per line, one response
/// per line.
async fn serve_session(server: Arc<Server>, socket: tokio::net::TcpStream) -> Result<()> {
    let (reader, mut writer) = socket.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<jsonrpc::Request>(&line) {
            Ok(request) => {
                // `wait` operations block between polls, so requests are
                // dispatched off the reactor.
                let server = server.clone();
                tokio::task::spawn_blocking(move || jsonrpc::dispatch(&server, &request))
                    .await?
            }
            Err(error) => {
                jsonrpc::Response::error(serde_json::Value::Null, format!("parse error: {error}"))
            }
        };
        let mut payload = serde_json::to_vec(&response)?;
        payload.push(b'\n');
        writer.write_all(&payload).await?;
    }
    Ok(())
}
