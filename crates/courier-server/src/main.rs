use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, UdpSocket};
use tracing::{error, info};

use courier_db::{BlobStore, Database};
use courier_server::datagram::DatagramHandler;
use courier_server::reassembly::ReassemblyTable;
use courier_server::session::Session;

/// Abandoned UDP file transfers are dropped after this much inactivity.
const REASSEMBLY_MAX_IDLE: Duration = Duration::from_secs(120);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "courier=debug".into()),
        )
        .init();

    // Config
    let host = std::env::var("COURIER_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let tcp_port: u16 = std::env::var("COURIER_TCP_PORT")
        .unwrap_or_else(|_| "12345".into())
        .parse()?;
    let udp_port: u16 = std::env::var("COURIER_UDP_PORT")
        .unwrap_or_else(|_| "54321".into())
        .parse()?;
    let db_path = std::env::var("COURIER_DB_PATH").unwrap_or_else(|_| "courier.db".into());
    let files_dir = std::env::var("COURIER_FILES_DIR").unwrap_or_else(|_| "./files".into());

    let db = Arc::new(Database::open(&PathBuf::from(&db_path))?);
    let blobs = Arc::new(BlobStore::new(PathBuf::from(files_dir)).await?);

    let listener = TcpListener::bind(format!("{host}:{tcp_port}")).await?;
    let udp_socket = Arc::new(UdpSocket::bind(format!("{host}:{udp_port}")).await?);
    info!("Courier listening on {host}:{tcp_port} (tcp) and {host}:{udp_port} (udp)");

    let reassembly = ReassemblyTable::new();
    reassembly.spawn_sweeper(REASSEMBLY_MAX_IDLE);

    let datagrams = DatagramHandler::new(udp_socket, db.clone(), blobs.clone(), reassembly);
    tokio::spawn(datagrams.run());

    // One task per accepted connection; accept errors are not fatal.
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                info!("tcp: connection from {addr}");
                let session = Session::new(db.clone(), blobs.clone());
                tokio::spawn(async move {
                    session.run(stream).await;
                    info!("tcp: {addr} disconnected");
                });
            }
            Err(e) => error!("tcp: accept error: {e}"),
        }
    }
}
