//! Network subsystem for multicast audio reception

pub mod session;
pub mod udp;

pub use session::{SessionSnapshot, SessionStats, StreamProcessor};
pub use udp::create_multicast_socket;
