use thiserror::Error;

/// Protocol-level failures. Each variant renders as the wire code carried in
/// an `ERROR <code>` response; all of them are recoverable at the
/// session/request level.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("InvalidSyntax")]
    InvalidSyntax,
    #[error("Unauthorized")]
    Unauthorized,
    #[error("UserExists")]
    UserExists,
    #[error("UserNotFound")]
    UserNotFound,
    #[error("IncorrectPassword")]
    IncorrectPassword,
    #[error("RecipientNotFound")]
    RecipientNotFound,
    #[error("UnknownCommand")]
    UnknownCommand,
    #[error("InvalidChunkRange")]
    InvalidChunkRange,
    #[error("MissingChunk {0}")]
    MissingChunk(u32),
    #[error("FileWriteFailure")]
    FileWriteFailure,
}
