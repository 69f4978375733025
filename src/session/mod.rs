//! Session subsystem: wire protocol and connection state machine

pub mod connection;
pub mod message;

pub use connection::SessionConnection;
pub use message::{
    ConnectionState, ImageKind, MediaChunk, SessionEvent, SessionParams, WireMessage,
};
