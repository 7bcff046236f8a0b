//! A minimal client for the subset of the MPD text protocol this crate
//! needs (§6.1): connect/idle/status/queue manipulation/seek. Not a
//! general-purpose MPD library — the rest of the protocol is out of
//! scope.

mod connection;
mod protocol;
mod status;

pub use connection::{BatchResult, Connection};
pub use status::{PlayState, PlaybackModes, StatusSnapshot};

use std::io;

#[derive(thiserror::Error, Debug)]
pub enum MpdError {
    #[error("io: {0}")]
    Io(#[from] io::Error),
    #[error("protocol error: {line}")]
    Protocol { line: String },
    #[error("connection timed out")]
    Timeout,
    #[error("connection closed unexpectedly")]
    UnexpectedEof,
    #[error("not connected")]
    NotConnected,
    #[error("already in a command list")]
    CommandListAlreadyOpen,
}

pub type MpdResult<T> = ::std::result::Result<T, MpdError>;
