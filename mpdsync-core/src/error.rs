use std::io;

use crate::mpd::MpdError;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] io::Error),
    #[error("mpd: {0}")]
    Mpd(#[from] MpdError),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("background task panicked: {0}")]
    TaskPanicked(String),
}

pub type Result<T> = ::std::result::Result<T, Error>;
