#![allow(clippy::len_without_is_empty)]
#![allow(clippy::new_without_default)]

/// Size of a hashname (SHA-256 of the DER encoded RSA public key).
pub const HASHNAME_SIZE: usize = 32;
/// Size of a line identifier.
pub const LINE_ID_SIZE: usize = 16;

pub mod crypto;
pub mod encoding;
pub mod logging;
pub mod time;
