//! The "status snapshot" data model (§3): an immutable record produced by
//! reading a daemon's status at a point in time.

use super::protocol::Field;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayState {
    Play,
    Pause,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlaybackModes {
    pub consume: bool,
    pub random: bool,
    pub repeat: bool,
    pub single: bool,
}

/// An immutable snapshot of a daemon's `status` response. A failed read
/// produces [`StatusSnapshot::null`]; consumers tolerate it by treating
/// every field as absent/default.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusSnapshot {
    pub queue_length: u32,
    pub queue_version: Option<String>,
    pub current_track: Option<u32>,
    pub elapsed: Option<f64>,
    pub duration: Option<f64>,
    pub state: PlayState,
    pub modes: PlaybackModes,
}

impl StatusSnapshot {
    /// A status snapshot representing "we couldn't read the daemon".
    pub fn null() -> Self {
        Self {
            queue_length: 0,
            queue_version: None,
            current_track: None,
            elapsed: None,
            duration: None,
            state: PlayState::Stop,
            modes: PlaybackModes::default(),
        }
    }

    pub fn is_playing(&self) -> bool {
        self.state == PlayState::Play
    }

    pub(super) fn parse(fields: &[Field]) -> Self {
        let get = |key: &str| fields.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str());
        let flag = |key: &str| get(key) == Some("1");

        Self {
            queue_length: get("playlistlength")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            queue_version: get("playlist").map(String::from),
            current_track: get("song").and_then(|v| v.parse().ok()),
            elapsed: get("elapsed").and_then(|v| v.parse().ok()),
            duration: get("duration").and_then(|v| v.parse().ok()),
            state: match get("state") {
                Some("play") => PlayState::Play,
                Some("pause") => PlayState::Pause,
                _ => PlayState::Stop,
            },
            modes: PlaybackModes {
                consume: flag("consume"),
                random: flag("random"),
                repeat: flag("repeat"),
                single: flag("single"),
            },
        }
    }
}
