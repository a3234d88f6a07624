//! Line Protocol
//!
//! Newline-delimited UTF-8 text. Clients send `/quit`, `/broadcast <text>`
//! or plain lines; the server relays broadcast payloads verbatim.

pub mod constants;
pub mod types;

pub use constants::*;
pub use types::Command;
