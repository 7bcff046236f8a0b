//! Per-follower bookkeeping (§3, §4.3): identity, drift history,
//! adjustment history, and the re-entrancy guard that keeps two loop
//! iterations from stacking on the same follower.

use std::collections::HashMap;
use std::path::Path;

use crate::endpoint::Endpoint;
use crate::mpd::Connection;
use crate::stats::WindowedStat;

/// The diagnostics archived when a track ends: what the controller tried
/// on that track, and the raw drift samples it observed.
#[derive(Debug, Clone)]
pub struct TrackDiagnostics {
    pub adjustments: WindowedStat,
    pub differences: WindowedStat,
}

/// All per-follower mutable state (§3). `syncLoopLocked` is not a field
/// here: it is realized by wrapping this struct in a
/// `tokio::sync::Mutex` at the collection level (see
/// [`crate::supervisor::FollowerLock`]) and having the drift controller
/// `try_lock` it rather than block — a re-entrancy guard, not a
/// mutual-exclusion discipline between the dispatcher and the
/// controller (§9).
pub struct FollowerState {
    pub endpoint: Endpoint,
    pub connection: Connection,

    pub has_been_synced: bool,
    pub queue_version: Option<String>,
    pub last_track_index: Option<u32>,
    pub current_track_index: Option<u32>,
    pub current_track_filetype: Option<String>,
    /// The follower's queue the last time the replicator looked at it —
    /// just enough (file paths, in order) to resolve a track index to a
    /// filetype for [`Self::filetype_adjustments`] without an extra
    /// round trip the protocol doesn't expose (§6.1 has no `currentsong`).
    pub known_queue: Vec<String>,

    pub pings: WindowedStat,
    pub adjustments: WindowedStat,
    pub initial_play_times: WindowedStat,
    pub current_track_differences: WindowedStat,
    pub current_track_adjustments: WindowedStat,
    pub current_track_should_seek: bool,
    pub filetype_adjustments: HashMap<String, WindowedStat>,
    pub track_history: Vec<TrackDiagnostics>,
}

impl FollowerState {
    pub fn new(endpoint: Endpoint) -> Self {
        let connection = Connection::new(
            endpoint.host.clone(),
            endpoint.port,
            endpoint.password.clone(),
        );
        Self {
            endpoint,
            connection,
            has_been_synced: false,
            queue_version: None,
            last_track_index: None,
            current_track_index: None,
            current_track_filetype: None,
            known_queue: Vec::new(),
            pings: WindowedStat::bounded(10),
            adjustments: WindowedStat::bounded(20),
            initial_play_times: WindowedStat::bounded(20),
            current_track_differences: WindowedStat::unbounded(),
            current_track_adjustments: WindowedStat::bounded(10),
            current_track_should_seek: true,
            filetype_adjustments: HashMap::new(),
            track_history: Vec::new(),
        }
    }

    /// Re-derive `current_track_filetype` from `known_queue` and
    /// `current_track_index`. Called by the drift controller whenever
    /// the observed track index changes.
    pub fn refresh_current_filetype(&mut self) {
        self.current_track_filetype = self
            .current_track_index
            .and_then(|i| self.known_queue.get(i as usize))
            .and_then(|file| Path::new(file).extension())
            .map(|ext| ext.to_string_lossy().into_owned());
    }

    /// Detect and react to a track change (§4.3): archive the outgoing
    /// track's histories, reset the per-track windows, and mark the new
    /// track as worth correcting again.
    pub fn reset_on_track_change(&mut self, observed_track_index: Option<u32>) -> bool {
        if observed_track_index == self.last_track_index {
            return false;
        }

        self.track_history.push(TrackDiagnostics {
            adjustments: std::mem::replace(
                &mut self.current_track_adjustments,
                WindowedStat::bounded(10),
            ),
            differences: std::mem::replace(
                &mut self.current_track_differences,
                WindowedStat::unbounded(),
            ),
        });
        self.current_track_should_seek = true;
        self.last_track_index = observed_track_index;
        true
    }

    pub fn record_adjustment(&mut self, value: f64) {
        self.adjustments.push(value);
        self.current_track_adjustments.push(value);
        if let Some(filetype) = &self.current_track_filetype {
            self.filetype_adjustments
                .entry(filetype.clone())
                .or_insert_with(|| WindowedStat::unbounded())
                .push(value);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn endpoint() -> Endpoint {
        Endpoint::parse("localhost:6600", None).unwrap()
    }

    #[test]
    fn track_change_resets_per_track_windows_and_archives_history() {
        let mut f = FollowerState::new(endpoint());
        f.last_track_index = Some(0);
        f.current_track_differences.push(0.1);
        f.current_track_adjustments.push(0.05);
        f.current_track_should_seek = false;

        let changed = f.reset_on_track_change(Some(1));

        assert!(changed);
        assert_eq!(f.last_track_index, Some(1));
        assert!(f.current_track_should_seek);
        assert!(f.current_track_differences.is_empty());
        assert!(f.current_track_adjustments.is_empty());
        assert_eq!(f.track_history.len(), 1);
        assert_eq!(f.track_history[0].differences.snapshot(), &[0.1]);
    }

    #[test]
    fn same_track_index_does_not_reset() {
        let mut f = FollowerState::new(endpoint());
        f.last_track_index = Some(0);
        f.current_track_differences.push(0.1);

        let changed = f.reset_on_track_change(Some(0));

        assert!(!changed);
        assert_eq!(f.current_track_differences.snapshot(), &[0.1]);
    }

    #[test]
    fn filetype_is_derived_from_known_queue_and_track_index() {
        let mut f = FollowerState::new(endpoint());
        f.known_queue = vec!["a.mp3".into(), "http://example.com/stream".into()];

        f.current_track_index = Some(0);
        f.refresh_current_filetype();
        assert_eq!(f.current_track_filetype.as_deref(), Some("mp3"));

        f.current_track_index = Some(1);
        f.refresh_current_filetype();
        assert_eq!(f.current_track_filetype, None);
    }

    #[test]
    fn record_adjustment_buckets_by_current_filetype() {
        let mut f = FollowerState::new(endpoint());
        f.current_track_filetype = Some("flac".into());
        f.record_adjustment(0.05);
        assert_eq!(f.filetype_adjustments["flac"].snapshot(), &[0.05]);
    }
}
