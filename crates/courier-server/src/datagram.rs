//! Stateless-per-packet UDP command handling.
//!
//! There is no connection, so credentials ride along on every request and
//! are re-validated each time. The one piece of shared mutable state is the
//! chunk reassembly table. Each inbound packet is dispatched to its own task
//! so a long RECEIVE fan-out cannot stall ingestion of later datagrams.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use courier_db::models::MessageRow;
use courier_db::{BlobStore, Database};
use courier_types::{Credentials, ProtocolError, UdpCommand, response};
use tokio::net::UdpSocket;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::auth;
use crate::reassembly::{ChunkOutcome, ReassemblyTable, TransferKey};

/// Receive buffer; one datagram is one request.
const RECV_BUF_SIZE: usize = 2048;

/// RECEIVE fan-out splits file blobs into chunks of this size, one datagram
/// per chunk.
const FANOUT_CHUNK_SIZE: usize = 1024;

#[derive(Clone)]
pub struct DatagramHandler {
    socket: Arc<UdpSocket>,
    db: Arc<Database>,
    blobs: Arc<BlobStore>,
    reassembly: ReassemblyTable,
}

impl DatagramHandler {
    pub fn new(
        socket: Arc<UdpSocket>,
        db: Arc<Database>,
        blobs: Arc<BlobStore>,
        reassembly: ReassemblyTable,
    ) -> Self {
        Self {
            socket,
            db,
            blobs,
            reassembly,
        }
    }

    /// Main receive loop. Runs until the task is cancelled.
    pub async fn run(self) {
        let mut buf = vec![0u8; RECV_BUF_SIZE];
        loop {
            match self.socket.recv_from(&mut buf).await {
                Ok((len, src)) => {
                    if len == 0 {
                        continue;
                    }
                    let datagram = buf[..len].to_vec();
                    let handler = self.clone();
                    tokio::spawn(async move {
                        handler.handle_packet(datagram, src).await;
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::ConnectionReset => {
                    // ICMP port unreachable surfaces here on Windows; ignore.
                    continue;
                }
                Err(e) => error!("udp: recv error: {e}"),
            }
        }
    }

    /// Handle one request end to end and reply to the packet's source.
    pub async fn handle_packet(&self, datagram: Vec<u8>, src: SocketAddr) {
        match self.dispatch(&datagram, src).await {
            Ok(Some(reply)) => {
                if let Err(e) = self.socket.send_to(reply.as_bytes(), src).await {
                    warn!("udp: send to {src} failed: {e}");
                }
            }
            // Reply already sent by the handler.
            Ok(None) => {}
            Err(e) => warn!("udp: dropping request from {src}: {e:#}"),
        }
    }

    async fn dispatch(&self, datagram: &[u8], src: SocketAddr) -> Result<Option<String>> {
        let cmd = match UdpCommand::parse(datagram) {
            Ok(cmd) => cmd,
            Err(e) => return Ok(Some(response::error(&e))),
        };

        match cmd {
            UdpCommand::Register { username, password } => {
                let reply = match auth::register_user(&self.db, &username, &password)? {
                    Ok(_token) => {
                        info!("udp: registered {username}");
                        response::OK.to_string()
                    }
                    Err(e) => response::error(&e),
                };
                Ok(Some(reply))
            }
            UdpCommand::Send {
                creds,
                recipient,
                text,
            } => {
                let sender = match auth::validate_credentials(
                    &self.db,
                    &creds.username,
                    &creds.password,
                )? {
                    Ok(user) => user,
                    Err(e) => return Ok(Some(response::error(&e))),
                };
                let Some(recipient) = self.db.get_user_by_username(&recipient)? else {
                    return Ok(Some(response::error(&ProtocolError::RecipientNotFound)));
                };
                let id = Uuid::new_v4().to_string();
                self.db
                    .insert_message(&id, &sender.id, &recipient.id, &text, None)?;
                Ok(Some(response::OK.to_string()))
            }
            UdpCommand::Receive { creds } => self.handle_receive(creds, src).await,
            UdpCommand::File {
                creds,
                recipient,
                text,
                file_name,
                chunk_no,
                chunk_total,
                chunk,
            } => {
                self.handle_file(creds, recipient, text, file_name, chunk_no, chunk_total, chunk)
                    .await
            }
        }
    }

    /// Acknowledge with `OK`, then fan out one datagram per pending message.
    /// The follow-up datagrams are best-effort; UDP adds no delivery or
    /// ordering guarantee and neither do we.
    async fn handle_receive(
        &self,
        creds: Credentials,
        src: SocketAddr,
    ) -> Result<Option<String>> {
        let user =
            match auth::validate_credentials(&self.db, &creds.username, &creds.password)? {
                Ok(user) => user,
                Err(e) => return Ok(Some(response::error(&e))),
            };

        let messages = self.db.get_messages_for_recipient(&user.id)?;
        self.socket.send_to(response::OK.as_bytes(), src).await?;

        let handler = self.clone();
        tokio::spawn(async move {
            if let Err(e) = handler.fan_out(messages, src).await {
                warn!("udp: RECEIVE fan-out to {src} failed: {e:#}");
            }
        });

        Ok(None)
    }

    async fn fan_out(&self, messages: Vec<MessageRow>, dest: SocketAddr) -> Result<()> {
        let total = messages.len();
        for (idx, msg) in messages.iter().enumerate() {
            let line = format!("[{}/{}] {} {}", idx + 1, total, msg.sender_username, msg.text);
            self.socket.send_to(line.as_bytes(), dest).await?;

            if let Some(file_id) = &msg.attached_file_id {
                self.send_file_chunks(file_id, &msg.sender_username, dest)
                    .await?;
            }
        }
        Ok(())
    }

    /// Stream an attached file back as numbered chunk datagrams:
    /// `[<chunkIdx>/<chunkTotal>] <sender> <fileName> ` + chunk bytes.
    async fn send_file_chunks(
        &self,
        file_id: &str,
        sender: &str,
        dest: SocketAddr,
    ) -> Result<()> {
        let Some(file) = self.db.get_file_by_id(file_id)? else {
            warn!("udp: message references missing file {file_id}");
            return Ok(());
        };
        let bytes = self.blobs.read(file_id).await?;

        let chunk_total = bytes.len().div_ceil(FANOUT_CHUNK_SIZE);
        for (idx, chunk) in bytes.chunks(FANOUT_CHUNK_SIZE).enumerate() {
            let mut datagram =
                format!("[{}/{}] {} {} ", idx + 1, chunk_total, sender, file.file_name)
                    .into_bytes();
            datagram.extend_from_slice(chunk);
            self.socket.send_to(&datagram, dest).await?;
        }
        Ok(())
    }

    /// One chunk of a client-to-server file transfer. The transfer completes
    /// when its reassembly entry holds every chunk, at which point the file
    /// and its message are persisted atomically from this handler's view.
    #[allow(clippy::too_many_arguments)]
    async fn handle_file(
        &self,
        creds: Credentials,
        recipient: String,
        text: String,
        file_name: String,
        chunk_no: u32,
        chunk_total: u32,
        chunk: Vec<u8>,
    ) -> Result<Option<String>> {
        let sender =
            match auth::validate_credentials(&self.db, &creds.username, &creds.password)? {
                Ok(user) => user,
                Err(e) => return Ok(Some(response::error(&e))),
            };
        let Some(recipient) = self.db.get_user_by_username(&recipient)? else {
            return Ok(Some(response::error(&ProtocolError::RecipientNotFound)));
        };

        let key = TransferKey {
            sender: sender.username.clone(),
            file_name: file_name.clone(),
        };
        match self.reassembly.insert(key, chunk_no, chunk_total, chunk).await {
            Err(e) => Ok(Some(response::error(&e))),
            Ok(ChunkOutcome::Incomplete) => Ok(Some(response::ok_chunk_received(chunk_no))),
            Ok(ChunkOutcome::Complete(bytes)) => {
                let file_id = Uuid::new_v4().to_string();
                if let Err(e) = self.blobs.write(&file_id, &bytes).await {
                    warn!("udp: failed to persist {file_name}: {e:#}");
                    return Ok(Some(response::error(&ProtocolError::FileWriteFailure)));
                }
                self.db.insert_file(&file_id, &file_name)?;
                let msg_id = Uuid::new_v4().to_string();
                self.db.insert_message(
                    &msg_id,
                    &sender.id,
                    &recipient.id,
                    &text,
                    Some(&file_id),
                )?;
                info!(
                    "udp: reassembled {file_name} ({} bytes) from {}",
                    bytes.len(),
                    sender.username
                );
                Ok(Some(response::OK.to_string()))
            }
        }
    }
}
