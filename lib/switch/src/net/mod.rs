//! The networking modules implement the Telehash wire protocol: packet
//! framing, the open handshake, encrypted lines, channel multiplexing and
//! the UDP reactor driving them.

pub mod shared;

pub mod packet;

pub mod open;

pub mod channel;
pub mod line;

pub mod queue;
pub mod switch;
