#![warn(clippy::dbg_macro)]

pub mod drift;
pub mod endpoint;
pub mod error;
pub mod follower;
pub mod mpd;
pub mod queue;
pub mod replicator;
pub mod stats;
pub mod supervisor;

pub use error::Error;
