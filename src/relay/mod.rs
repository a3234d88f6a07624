//! Broadcast Relay Module
//! 
//! Per-connection sessions and the fan-out of broadcast payloads.

pub mod engine;
pub mod session;

pub use engine::{BroadcastEngine, BroadcastReport};
pub use session::{ClientSession, ExitReason, SessionState, SessionSummary};
