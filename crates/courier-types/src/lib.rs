//! Wire-level types shared by the TCP and UDP protocol surfaces: the closed
//! protocol error enum, the parsed command types, and response formatting.
//!
//! Kept independent of the store and the runtime so parsers stay trivially
//! unit-testable.

pub mod error;
pub mod request;
pub mod response;

pub use error::ProtocolError;
pub use request::{Credentials, TcpCommand, UdpCommand};
