//! Length-prefixed string framing for the TCP transport.
//!
//! Each frame is a UTF-8 string prefixed by its byte length as a big-endian
//! `u16`, matching the symmetric read/write primitives used by existing
//! clients. The prefix caps frames at 64 KiB.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Read one frame. `Ok(None)` means the peer closed the stream at a frame
/// boundary; a short read inside a frame or invalid UTF-8 is an error.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<Option<String>> {
    let len = match reader.read_u16().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    };

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;

    String::from_utf8(buf)
        .map(Some)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "frame is not valid UTF-8"))
}

pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &str) -> io::Result<()> {
    let bytes = frame.as_bytes();
    let len = u16::try_from(bytes.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "frame exceeds 64 KiB"))?;
    writer.write_u16(len).await?;
    writer.write_all(bytes).await?;
    writer.flush().await
}
