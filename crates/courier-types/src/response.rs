//! Response frame formatting. One logical response per frame/datagram.

use crate::error::ProtocolError;

pub const OK: &str = "OK";

/// `RECEIVE` header: `OK <count>`, followed by one frame per message.
pub fn ok_count(count: usize) -> String {
    format!("OK {count}")
}

/// Acknowledgment for a chunk of a still-incomplete UDP file transfer.
pub fn ok_chunk_received(chunk_no: u32) -> String {
    format!("OK File chunk received {chunk_no}")
}

pub fn error(err: &ProtocolError) -> String {
    format!("ERROR {err}")
}
