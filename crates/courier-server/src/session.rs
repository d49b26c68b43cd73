//! Per-connection TCP session.
//!
//! One session per accepted connection, exclusively owned by its task. The
//! session is a two-state machine: Unauthenticated until a successful
//! REGISTER or LOGIN stores the user's auth token, Authenticated until
//! LOGOUT or disconnect. Command processing is strictly sequential; the one
//! piece of state carried between frames is the token.

use std::sync::Arc;

use anyhow::Result;
use courier_db::models::UserRow;
use courier_db::{BlobStore, Database};
use courier_types::{ProtocolError, TcpCommand, response};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth;
use crate::frame;

/// FILE bodies are drained from the stream in blocks of this size.
const FILE_BLOCK_SIZE: usize = 4 * 1024;

pub struct Session {
    db: Arc<Database>,
    blobs: Arc<BlobStore>,
    auth_token: Option<String>,
}

impl Session {
    pub fn new(db: Arc<Database>, blobs: Arc<BlobStore>) -> Self {
        Self {
            db,
            blobs,
            auth_token: None,
        }
    }

    /// Drive the session until LOGOUT, peer disconnect, or a failed frame
    /// read. Frame-level failures are fatal to this connection only.
    pub async fn run<S: AsyncRead + AsyncWrite + Unpin>(mut self, stream: S) {
        let (mut reader, mut writer) = tokio::io::split(stream);

        loop {
            let line = match frame::read_frame(&mut reader).await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    warn!("session: frame read failed: {e}");
                    break;
                }
            };

            match self.handle_frame(&line, &mut reader, &mut writer).await {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    warn!("session: terminating on error: {e:#}");
                    break;
                }
            }
        }
    }

    /// One request/response cycle. Returns `Ok(false)` when the loop should
    /// end (LOGOUT).
    async fn handle_frame<R, W>(
        &mut self,
        line: &str,
        reader: &mut R,
        writer: &mut W,
    ) -> Result<bool>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let cmd = match TcpCommand::parse(line) {
            Ok(cmd) => cmd,
            Err(e) => {
                frame::write_frame(writer, &response::error(&e)).await?;
                return Ok(true);
            }
        };

        let is_auth_command = matches!(cmd, TcpCommand::Register { .. } | TcpCommand::Login { .. });

        // Auth gating: everything except REGISTER/LOGIN requires a token,
        // and REGISTER/LOGIN are only recognized before authentication.
        if self.auth_token.is_none() && !is_auth_command {
            frame::write_frame(writer, &response::error(&ProtocolError::Unauthorized)).await?;
            return Ok(true);
        }
        if self.auth_token.is_some() && is_auth_command {
            frame::write_frame(writer, &response::error(&ProtocolError::UnknownCommand)).await?;
            return Ok(true);
        }

        match cmd {
            TcpCommand::Register { username, password } => {
                let reply = match auth::register_user(&self.db, &username, &password)? {
                    Ok(token) => {
                        info!("session: registered {username}");
                        self.auth_token = Some(token);
                        response::OK.to_string()
                    }
                    Err(e) => response::error(&e),
                };
                frame::write_frame(writer, &reply).await?;
            }
            TcpCommand::Login { username, password } => {
                let reply = match auth::validate_credentials(&self.db, &username, &password)? {
                    Ok(user) => {
                        info!("session: {username} logged in");
                        self.auth_token = Some(user.auth_token);
                        response::OK.to_string()
                    }
                    Err(e) => response::error(&e),
                };
                frame::write_frame(writer, &reply).await?;
            }
            TcpCommand::Send { recipient, text } => {
                self.handle_send(&recipient, &text, writer).await?;
            }
            TcpCommand::Receive => {
                self.handle_receive(writer).await?;
            }
            TcpCommand::File {
                recipient,
                file_name,
                size,
                text,
            } => {
                self.handle_file(&recipient, &file_name, size, &text, reader, writer)
                    .await?;
            }
            TcpCommand::Logout => {
                self.auth_token = None;
                frame::write_frame(writer, response::OK).await?;
                return Ok(false);
            }
        }

        Ok(true)
    }

    /// The user behind the session's token. `None` only if the token
    /// vanished from the store underneath us.
    fn current_user(&self) -> Result<Option<UserRow>> {
        match &self.auth_token {
            Some(token) => self.db.get_user_by_token(token),
            None => Ok(None),
        }
    }

    async fn handle_send<W: AsyncWrite + Unpin>(
        &self,
        recipient: &str,
        text: &str,
        writer: &mut W,
    ) -> Result<()> {
        let reply = match self.current_user()? {
            None => response::error(&ProtocolError::Unauthorized),
            Some(sender) => match self.db.get_user_by_username(recipient)? {
                None => response::error(&ProtocolError::RecipientNotFound),
                Some(recipient) => {
                    let id = Uuid::new_v4().to_string();
                    self.db
                        .insert_message(&id, &sender.id, &recipient.id, text, None)?;
                    response::OK.to_string()
                }
            },
        };
        frame::write_frame(writer, &reply).await?;
        Ok(())
    }

    /// `OK <count>` header, then one frame per message in store-return
    /// order. Messages are not consumed; repeated RECEIVEs return the same
    /// set plus any new arrivals.
    async fn handle_receive<W: AsyncWrite + Unpin>(&self, writer: &mut W) -> Result<()> {
        let Some(user) = self.current_user()? else {
            frame::write_frame(writer, &response::error(&ProtocolError::Unauthorized)).await?;
            return Ok(());
        };

        let messages = self.db.get_messages_for_recipient(&user.id)?;
        frame::write_frame(writer, &response::ok_count(messages.len())).await?;
        for msg in &messages {
            frame::write_frame(writer, &format!("{} {}", msg.sender_username, msg.text)).await?;
        }
        Ok(())
    }

    /// The file body follows the command frame on the wire, so the body is
    /// only consumed once the command is accepted; a rejected FILE never
    /// touches the stream.
    async fn handle_file<R, W>(
        &self,
        recipient: &str,
        file_name: &str,
        size: u64,
        text: &str,
        reader: &mut R,
        writer: &mut W,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let Some(sender) = self.current_user()? else {
            frame::write_frame(writer, &response::error(&ProtocolError::Unauthorized)).await?;
            return Ok(());
        };
        let Some(recipient) = self.db.get_user_by_username(recipient)? else {
            frame::write_frame(writer, &response::error(&ProtocolError::RecipientNotFound)).await?;
            return Ok(());
        };

        let file_id = Uuid::new_v4().to_string();
        match self.receive_body(&file_id, size, reader).await {
            Ok(()) => {
                self.db.insert_file(&file_id, file_name)?;
                let msg_id = Uuid::new_v4().to_string();
                self.db.insert_message(
                    &msg_id,
                    &sender.id,
                    &recipient.id,
                    text,
                    Some(&file_id),
                )?;
                info!("session: stored {file_name} ({size} bytes) as {file_id}");
                frame::write_frame(writer, response::OK).await?;
            }
            Err(e) => {
                // A truncated body fails the transfer: no File record, no
                // message, and the partial blob is rolled back.
                warn!("session: file transfer failed: {e:#}");
                self.blobs.remove(&file_id).await?;
                frame::write_frame(writer, &response::error(&ProtocolError::FileWriteFailure))
                    .await?;
            }
        }
        Ok(())
    }

    /// Read exactly `size` bytes in fixed-size blocks, streaming them into a
    /// fresh blob. A stream that closes early is an error.
    async fn receive_body<R: AsyncRead + Unpin>(
        &self,
        file_id: &str,
        size: u64,
        reader: &mut R,
    ) -> Result<()> {
        let mut out = self.blobs.create(file_id).await?;
        let mut block = vec![0u8; FILE_BLOCK_SIZE];
        let mut remaining = size;

        while remaining > 0 {
            let want = remaining.min(FILE_BLOCK_SIZE as u64) as usize;
            let n = reader.read(&mut block[..want]).await?;
            if n == 0 {
                anyhow::bail!("stream closed with {remaining} bytes outstanding");
            }
            out.write_all(&block[..n]).await?;
            remaining -= n as u64;
        }

        out.flush().await?;
        Ok(())
    }
}
