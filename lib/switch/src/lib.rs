//! A Telehash peer node: hashname identities, the open handshake, encrypted
//! lines and the UDP reactor multiplexing channels over them.

pub mod identity;
pub mod node;
pub mod storage;

pub mod net;
