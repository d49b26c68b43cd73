//! Command parsers for both transports.
//!
//! Requests are space-delimited UTF-8 text; the first token is the command
//! name. Both parsers are total: an unrecognized command yields
//! `UnknownCommand`, anything structurally wrong yields `InvalidSyntax`.
//! UDP `FILE` is the one place where the payload may be arbitrary bytes, so
//! the UDP parser walks the raw datagram and only decodes the header tokens.

use crate::error::ProtocolError;

/// Per-request credentials re-asserted on every UDP command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// One framed TCP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TcpCommand {
    Register { username: String, password: String },
    Login { username: String, password: String },
    Send { recipient: String, text: String },
    Receive,
    File { recipient: String, file_name: String, size: u64, text: String },
    Logout,
}

impl TcpCommand {
    pub fn parse(frame: &str) -> Result<Self, ProtocolError> {
        let frame = frame.trim_end_matches(['\r', '\n']);
        let command = frame.split(' ').next().unwrap_or("");
        match command {
            "REGISTER" => {
                let [_, username, password] = exact_tokens(frame)?;
                Ok(Self::Register {
                    username: username.to_string(),
                    password: password.to_string(),
                })
            }
            "LOGIN" => {
                let [_, username, password] = exact_tokens(frame)?;
                Ok(Self::Login {
                    username: username.to_string(),
                    password: password.to_string(),
                })
            }
            "SEND" => {
                // Text is the remainder and may contain spaces.
                let mut parts = frame.splitn(3, ' ');
                let _ = parts.next();
                let recipient = parts.next().ok_or(ProtocolError::InvalidSyntax)?;
                let text = parts.next().ok_or(ProtocolError::InvalidSyntax)?;
                if recipient.is_empty() || text.is_empty() {
                    return Err(ProtocolError::InvalidSyntax);
                }
                Ok(Self::Send {
                    recipient: recipient.to_string(),
                    text: text.to_string(),
                })
            }
            "RECEIVE" => {
                if frame != "RECEIVE" {
                    return Err(ProtocolError::InvalidSyntax);
                }
                Ok(Self::Receive)
            }
            "FILE" => {
                let mut parts = frame.splitn(5, ' ');
                let _ = parts.next();
                let recipient = parts.next().ok_or(ProtocolError::InvalidSyntax)?;
                let file_name = parts.next().ok_or(ProtocolError::InvalidSyntax)?;
                let size = parts
                    .next()
                    .ok_or(ProtocolError::InvalidSyntax)?
                    .parse::<u64>()
                    .map_err(|_| ProtocolError::InvalidSyntax)?;
                let text = parts.next().ok_or(ProtocolError::InvalidSyntax)?;
                if recipient.is_empty() || file_name.is_empty() || text.is_empty() {
                    return Err(ProtocolError::InvalidSyntax);
                }
                Ok(Self::File {
                    recipient: recipient.to_string(),
                    file_name: file_name.to_string(),
                    size,
                    text: text.to_string(),
                })
            }
            "LOGOUT" => {
                if frame != "LOGOUT" {
                    return Err(ProtocolError::InvalidSyntax);
                }
                Ok(Self::Logout)
            }
            _ => Err(ProtocolError::UnknownCommand),
        }
    }
}

/// Split a frame into exactly `N` non-empty space-separated tokens.
fn exact_tokens<const N: usize>(frame: &str) -> Result<[&str; N], ProtocolError> {
    let mut out = [""; N];
    let mut parts = frame.split(' ');
    for slot in &mut out {
        let token = parts.next().ok_or(ProtocolError::InvalidSyntax)?;
        if token.is_empty() {
            return Err(ProtocolError::InvalidSyntax);
        }
        *slot = token;
    }
    if parts.next().is_some() {
        return Err(ProtocolError::InvalidSyntax);
    }
    Ok(out)
}

/// One self-contained UDP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UdpCommand {
    Register {
        username: String,
        password: String,
    },
    Send {
        creds: Credentials,
        recipient: String,
        text: String,
    },
    Receive {
        creds: Credentials,
    },
    File {
        creds: Credentials,
        recipient: String,
        text: String,
        file_name: String,
        chunk_no: u32,
        chunk_total: u32,
        chunk: Vec<u8>,
    },
}

impl UdpCommand {
    pub fn parse(datagram: &[u8]) -> Result<Self, ProtocolError> {
        let mut tokens = Tokens::new(datagram);
        match tokens.next()? {
            "REGISTER" => {
                let username = tokens.next()?.to_string();
                let password = tokens.next()?.to_string();
                tokens.expect_end()?;
                Ok(Self::Register { username, password })
            }
            "SEND" => {
                let creds = tokens.credentials()?;
                let recipient = tokens.next()?.to_string();
                let text = tokens.rest_str()?.to_string();
                Ok(Self::Send { creds, recipient, text })
            }
            "RECEIVE" => {
                let creds = tokens.credentials()?;
                tokens.expect_end()?;
                Ok(Self::Receive { creds })
            }
            "FILE" => {
                let creds = tokens.credentials()?;
                let recipient = tokens.next()?.to_string();
                let text = tokens.next()?.to_string();
                let file_name = tokens.next()?.to_string();
                let chunk_no = tokens.next_u32()?;
                let chunk_total = tokens.next_u32()?;
                // Everything after the eighth space is the chunk payload,
                // spaces included.
                let chunk = tokens.rest();
                if chunk.is_empty() {
                    return Err(ProtocolError::InvalidSyntax);
                }
                Ok(Self::File {
                    creds,
                    recipient,
                    text,
                    file_name,
                    chunk_no,
                    chunk_total,
                    chunk: chunk.to_vec(),
                })
            }
            _ => Err(ProtocolError::UnknownCommand),
        }
    }
}

/// Cursor over a raw datagram, splitting on single spaces. Header tokens are
/// decoded as UTF-8; the remainder can be taken as raw bytes.
struct Tokens<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Tokens<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn next(&mut self) -> Result<&'a str, ProtocolError> {
        if self.pos >= self.data.len() {
            return Err(ProtocolError::InvalidSyntax);
        }
        let rest = &self.data[self.pos..];
        let (token, advance) = match rest.iter().position(|&b| b == b' ') {
            Some(sp) => (&rest[..sp], sp + 1),
            None => (rest, rest.len()),
        };
        self.pos += advance;
        if token.is_empty() {
            return Err(ProtocolError::InvalidSyntax);
        }
        std::str::from_utf8(token).map_err(|_| ProtocolError::InvalidSyntax)
    }

    fn next_u32(&mut self) -> Result<u32, ProtocolError> {
        self.next()?
            .parse::<u32>()
            .map_err(|_| ProtocolError::InvalidSyntax)
    }

    fn credentials(&mut self) -> Result<Credentials, ProtocolError> {
        Ok(Credentials {
            username: self.next()?.to_string(),
            password: self.next()?.to_string(),
        })
    }

    /// The raw remainder after the last consumed token.
    fn rest(&self) -> &'a [u8] {
        &self.data[self.pos.min(self.data.len())..]
    }

    fn rest_str(&self) -> Result<&'a str, ProtocolError> {
        let rest = self.rest();
        if rest.is_empty() {
            return Err(ProtocolError::InvalidSyntax);
        }
        std::str::from_utf8(rest).map_err(|_| ProtocolError::InvalidSyntax)
    }

    fn expect_end(&self) -> Result<(), ProtocolError> {
        if self.rest().is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::InvalidSyntax)
        }
    }
}
