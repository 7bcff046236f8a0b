//! Replication of leader queue/playback state onto one follower (§4.4).
//! Not the hard part — the drift controller depends on its
//! post-conditions (follower queue length equals leader's; follower
//! play state matches leader's within ~200ms and ~1s of drift).

use std::time::Duration;

use crate::follower::FollowerState;
use crate::mpd::{BatchResult, Connection, MpdResult, PlayState, StatusSnapshot};

const RETRY_ATTEMPTS: usize = 5;
const POST_PLAY_SETTLE: Duration = Duration::from_millis(200);
const ALREADY_PLAYING_DRIFT_TOLERANCE: f64 = 1.0;

/// Re-run a fallible replication step up to [`RETRY_ATTEMPTS`] times
/// across transient errors (§4.4, §7), logging each retry.
macro_rules! retry {
    ($body:expr) => {{
        let mut attempt = 1usize;
        loop {
            match $body {
                Ok(value) => break Ok(value),
                Err(error) if attempt < RETRY_ATTEMPTS => {
                    tracing::warn!(attempt, max = RETRY_ATTEMPTS, ?error, "retrying replication step");
                    attempt += 1;
                }
                Err(error) => break Err(error),
            }
        }
    }};
}

/// Bring one follower's queue and playback state to match the leader.
/// Non-fatal on semantic mismatch (§7): logs and continues.
pub async fn sync(leader: &mut Connection, follower: &mut FollowerState) -> MpdResult<()> {
    sync_queue(leader, follower).await?;
    let leader_status = leader.status().await;
    sync_playback(leader, &leader_status, follower).await?;
    sync_options();
    Ok(())
}

async fn sync_queue(leader: &mut Connection, follower: &mut FollowerState) -> MpdResult<()> {
    if !follower.has_been_synced {
        first_sync(leader, follower).await?;
    } else {
        incremental_sync(leader, follower).await?;
    }

    follower.known_queue = retry!(follower.connection.read_queue().await)?
        .into_iter()
        .map(|entry| entry.file)
        .collect();
    follower.refresh_current_filetype();
    Ok(())
}

/// §4.4 step 1: first-ever sync for this follower.
async fn first_sync(leader: &mut Connection, follower: &mut FollowerState) -> MpdResult<()> {
    let leader_status = leader.status().await;
    let leader_queue = retry!(leader.read_queue().await)?;
    let follower_queue = retry!(follower.connection.read_queue().await)?;

    if leader_queue != follower_queue {
        open_batch(&mut follower.connection);
        follower.connection.queue_clear()?;
        for entry in &leader_queue {
            follower.connection.queue_add(strip_file_marker(&entry.file))?;
        }
        retry!(follower.connection.batch_end().await)?;
    }

    follower.has_been_synced = true;
    follower.queue_version = leader_status.queue_version;
    Ok(())
}

/// §4.4 step 2: incremental sync against a previously-recorded version.
async fn incremental_sync(leader: &mut Connection, follower: &mut FollowerState) -> MpdResult<()> {
    let leader_status = leader.status().await;
    let changes = retry!(leader.queue_diff(follower.queue_version.as_deref()).await)?;

    if !changes.is_empty() {
        open_batch(&mut follower.connection);
        for change in &changes {
            follower
                .connection
                .queue_add_at(strip_file_marker(&change.file), change.pos)?;
        }
        let results = retry!(follower.connection.batch_end().await)?;
        let ids = results.into_iter().filter_map(|r| match r {
            BatchResult::Id(id) => Some(id),
            BatchResult::Unit => None,
        });

        let stream_tag_writes: Vec<(u32, &'static str, String)> = changes
            .iter()
            .zip(ids)
            .filter(|(change, _)| change.is_stream())
            .flat_map(|(change, id)| {
                change
                    .tags
                    .iter()
                    .map(move |(tag, value)| (id, tag, value.to_owned()))
            })
            .collect();

        if !stream_tag_writes.is_empty() {
            open_batch(&mut follower.connection);
            for (id, tag, value) in &stream_tag_writes {
                follower.connection.queue_set_tag(*id, tag, value)?;
            }
            retry!(follower.connection.batch_end().await)?;
        }
    }

    let follower_status = follower.connection.status().await;
    if leader_status.queue_length < follower_status.queue_length {
        if leader_status.queue_length == 0 {
            follower.connection.clear().await?;
        } else {
            follower.connection.truncate_to(leader_status.queue_length).await?;
        }
    }

    if follower.connection.status().await.queue_length != leader_status.queue_length {
        tracing::warn!(
            host = %follower.endpoint,
            leader_length = leader_status.queue_length,
            "follower queue length did not converge after replication"
        );
    }

    follower.queue_version = leader_status.queue_version;
    Ok(())
}

fn open_batch(connection: &mut Connection) {
    if connection.batch_begin().is_err() {
        tracing::warn!("batch already open, reopening (lost synchronization, not fatal)");
        connection.batch_reopen();
    }
}

fn strip_file_marker(file: &str) -> &str {
    file.strip_prefix("file: ").unwrap_or(file)
}

/// §4.4 step 3: propagate play/pause/stop and the leader's elapsed time.
async fn sync_playback(
    leader: &mut Connection,
    leader_status: &StatusSnapshot,
    follower: &mut FollowerState,
) -> MpdResult<()> {
    match leader_status.state {
        PlayState::Play => sync_playing(leader, leader_status, follower).await,
        PlayState::Pause => follower.connection.pause().await,
        PlayState::Stop => follower.connection.stop().await,
    }
}

async fn sync_playing(
    leader: &mut Connection,
    leader_status: &StatusSnapshot,
    follower: &mut FollowerState,
) -> MpdResult<()> {
    let follower_status = follower.connection.status().await;

    let already_aligned = follower_status.is_playing()
        && follower_status.current_track == leader_status.current_track
        && drift_between(leader_status, &follower_status) < ALREADY_PLAYING_DRIFT_TOLERANCE;
    if already_aligned {
        return Ok(());
    }

    let (Some(track), Some(elapsed)) = (leader_status.current_track, leader_status.elapsed) else {
        return Ok(());
    };

    follower.connection.seek(track, elapsed).await?;
    follower.connection.play().await?;
    tokio::time::sleep(POST_PLAY_SETTLE).await;

    // Re-read the leader so the "play latency" sample compares a common
    // reference moment; the leader has moved on during the seek/play/sleep.
    let leader_status_after = leader.status().await;
    let after = follower.connection.status().await;
    if let Some(latency) = signed_drift(&leader_status_after, &after) {
        follower.initial_play_times.push(latency);
    }

    Ok(())
}

fn drift_between(leader_status: &StatusSnapshot, follower_status: &StatusSnapshot) -> f64 {
    match (leader_status.elapsed, follower_status.elapsed) {
        (Some(l), Some(f)) => (l - f).abs(),
        _ => f64::INFINITY,
    }
}

/// Signed `leader_elapsed - follower_elapsed`, for samples (like play
/// latency) that are recorded rather than compared against a tolerance.
fn signed_drift(leader_status: &StatusSnapshot, follower_status: &StatusSnapshot) -> Option<f64> {
    match (leader_status.elapsed, follower_status.elapsed) {
        (Some(l), Some(f)) => Some(l - f),
        _ => None,
    }
}

/// §4.4 step 4: options replication. Unimplemented; interface reserved.
fn sync_options() {}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn strips_leading_file_marker() {
        assert_eq!(strip_file_marker("file: a.mp3"), "a.mp3");
        assert_eq!(strip_file_marker("a.mp3"), "a.mp3");
    }

    #[test]
    fn drift_between_is_infinite_when_either_elapsed_is_absent() {
        let mut l = StatusSnapshot::null();
        l.elapsed = Some(10.0);
        let f = StatusSnapshot::null();
        assert_eq!(drift_between(&l, &f), f64::INFINITY);
    }

    #[test]
    fn drift_between_is_absolute_difference() {
        let mut l = StatusSnapshot::null();
        l.elapsed = Some(10.5);
        let mut f = StatusSnapshot::null();
        f.elapsed = Some(10.2);
        assert!((drift_between(&l, &f) - 0.3).abs() < 1e-9);
    }

    #[test]
    fn signed_drift_preserves_sign() {
        let mut l = StatusSnapshot::null();
        l.elapsed = Some(10.0);
        let mut f = StatusSnapshot::null();
        f.elapsed = Some(10.2);
        assert!((signed_drift(&l, &f).unwrap() - (-0.2)).abs() < 1e-9);
    }

    #[test]
    fn signed_drift_is_none_when_either_elapsed_is_absent() {
        let mut l = StatusSnapshot::null();
        l.elapsed = Some(10.0);
        let f = StatusSnapshot::null();
        assert_eq!(signed_drift(&l, &f), None);
    }
}
