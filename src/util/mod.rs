//! Small helpers shared across the receiver.

pub mod hex;

pub use hex::{decode_hex, encode_hex, parse_hex_lenient, HexError};
