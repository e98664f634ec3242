//! TCP transport and name resolution.

pub mod dns;
pub mod socket;

pub use dns::resolve_host;
pub use socket::{Socket, SocketState};
