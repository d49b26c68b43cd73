//! Courier server: per-connection TCP sessions, per-datagram UDP handling,
//! and the shared file-chunk reassembly table.

pub mod auth;
pub mod datagram;
pub mod frame;
pub mod reassembly;
pub mod session;
