//! CMake server protocol (`cmake -E server`)
//!
//! Used for CMake versions without the file API:
//!
//! - **framing**: sentinel delimited JSON frames over a line transport
//! - **messages**: typed messages and replies with per-kind key validation
//! - **client**: cookie matched request/reply exchange and the server process

pub mod client;
pub mod framing;
pub mod messages;

pub use client::{CMakeClient, CMakeServer};
pub use messages::{ProtocolVersion, ReplyData, ServerMessage, ServerRequest};
