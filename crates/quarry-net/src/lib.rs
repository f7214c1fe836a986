//! Inbound protocol feed: a background reader thread that turns a decoded
//! packet stream into the packet and error channels drained by the frame
//! scheduler.

pub mod error;
pub mod reader;

pub use error::ProtocolError;
pub use reader::{ChannelSource, NetworkLink, PacketSource, spawn_reader};
