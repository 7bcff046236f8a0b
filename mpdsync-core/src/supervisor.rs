//! Wiring (C7) plus the event dispatcher (C6): owns both leader
//! connections, the follower table, and spawns the dispatcher and (if
//! enabled) the drift controller as `tokio::spawn`ed tasks, mirroring
//! the `join!` of the event loop and background tasks in the teacher's
//! `start_daemon_if_running_as_daemon` (`mlib::players::daemon`).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard, TryLockError};

use crate::drift;
use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::follower::FollowerState;
use crate::mpd::Connection;
use crate::replicator;
use crate::stats::WindowedStat;

/// `syncLoopLocked` (§3, §5, §9): wraps one follower's state in a
/// `tokio::sync::Mutex`. The drift controller only ever `try_acquire`s
/// it — a re-entrancy guard against two of its own iterations stacking
/// on a slow follower, not a fairness contract with the dispatcher,
/// which always blocking-acquires because replication must eventually
/// happen.
pub struct FollowerLock(Mutex<FollowerState>);

impl FollowerLock {
    fn new(state: FollowerState) -> Self {
        Self(Mutex::new(state))
    }

    pub fn try_acquire(&self) -> std::result::Result<MutexGuard<'_, FollowerState>, TryLockError> {
        self.0.try_lock()
    }

    pub async fn acquire(&self) -> MutexGuard<'_, FollowerState> {
        self.0.lock().await
    }
}

pub struct Supervisor {
    leader_primary: Connection,
    drift_leader: Option<Connection>,
    followers: Vec<Arc<FollowerLock>>,
    stop: Arc<AtomicBool>,
}

impl Supervisor {
    /// Connect the primary leader connection (dispatcher), a second
    /// dedicated leader connection if drift compensation is enabled,
    /// and every follower. Fatal (§7, §6.2) if the leader can't be
    /// reached or not a single follower connects.
    pub async fn connect(
        leader_endpoint: &Endpoint,
        follower_endpoints: &[Endpoint],
        enable_drift: bool,
    ) -> Result<Self> {
        let mut leader_primary = new_connection(leader_endpoint);
        leader_primary.connect().await?;

        let drift_leader = if enable_drift {
            let mut conn = new_connection(leader_endpoint);
            conn.connect().await?;
            Some(conn)
        } else {
            None
        };

        let mut followers = Vec::new();
        for endpoint in follower_endpoints {
            let mut state = FollowerState::new(endpoint.clone());
            match state.connection.connect().await {
                Ok(()) => followers.push(Arc::new(FollowerLock::new(state))),
                Err(error) => {
                    tracing::error!(%endpoint, ?error, "failed to connect to follower, skipping it");
                }
            }
        }

        if followers.is_empty() {
            return Err(Error::Configuration(
                "no follower could be connected".to_owned(),
            ));
        }

        Ok(Self {
            leader_primary,
            drift_leader,
            followers,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    /// A handle the caller can use to request cooperative shutdown
    /// (§5: "Cancellation. Cooperative.").
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// Run the event dispatcher and (if enabled) the drift controller
    /// until both stop. Never returns an `Err` from a loop iteration —
    /// per §7, only a task panic or the initial connect can fail this.
    pub async fn run(self) -> Result<()> {
        let Supervisor {
            leader_primary,
            drift_leader,
            followers,
            stop,
        } = self;

        let dispatcher = tokio::spawn(run_dispatcher(
            leader_primary,
            followers.clone(),
            stop.clone(),
        ));

        match drift_leader {
            Some(drift_leader) => {
                let controller = tokio::spawn(run_controller(drift_leader, followers, stop));
                let (dispatcher, controller) = tokio::join!(dispatcher, controller);
                dispatcher.map_err(|e| Error::TaskPanicked(e.to_string()))?;
                controller.map_err(|e| Error::TaskPanicked(e.to_string()))?;
            }
            None => {
                dispatcher
                    .await
                    .map_err(|e| Error::TaskPanicked(e.to_string()))?;
            }
        }

        Ok(())
    }
}

fn new_connection(endpoint: &Endpoint) -> Connection {
    Connection::new(endpoint.host.clone(), endpoint.port, endpoint.password.clone())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::endpoint::Endpoint;

    fn state() -> FollowerState {
        FollowerState::new(Endpoint::parse("localhost:6600", None).unwrap())
    }

    #[tokio::test]
    async fn try_acquire_fails_while_a_guard_is_held() {
        let lock = FollowerLock::new(state());
        let guard = lock.acquire().await;
        assert!(lock.try_acquire().is_err());
        drop(guard);
        assert!(lock.try_acquire().is_ok());
    }

    #[tokio::test]
    async fn acquire_blocks_until_the_holder_releases() {
        let lock = Arc::new(FollowerLock::new(state()));
        let guard = lock.acquire().await;

        let waiting = {
            let lock = lock.clone();
            tokio::spawn(async move {
                let _guard = lock.acquire().await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiting.is_finished());

        drop(guard);
        waiting.await.unwrap();
    }
}

/// C6: on the primary leader connection, wait for a change notification
/// and replicate it to every follower, forever.
async fn run_dispatcher(
    mut leader: Connection,
    followers: Vec<Arc<FollowerLock>>,
    stop: Arc<AtomicBool>,
) {
    while !stop.load(Ordering::Relaxed) {
        match leader.await_change().await {
            Ok(changed) => {
                tracing::debug!(?changed, "leader reported a change");
                for handle in &followers {
                    let mut follower = handle.acquire().await;
                    if let Err(error) = replicator::sync(&mut leader, &mut follower).await {
                        tracing::error!(host = %follower.endpoint, ?error, "replication failed, will retry on next change");
                    }
                }
            }
            Err(error) => {
                tracing::error!(?error, "leader idle call failed");
                leader.check_alive().await;
            }
        }
    }
}

const NOT_PLAYING_SLEEP: Duration = Duration::from_secs(2);

/// C5: the drift controller's loop (§4.5.4).
async fn run_controller(
    mut leader: Connection,
    followers: Vec<Arc<FollowerLock>>,
    stop: Arc<AtomicBool>,
) {
    let mut leader_pings = WindowedStat::bounded(10).named("leader-pings");

    while !stop.load(Ordering::Relaxed) {
        let leader_status = leader.status().await;
        if !leader_status.is_playing() {
            tokio::time::sleep(NOT_PLAYING_SLEEP).await;
            continue;
        }

        let mut any_reseek = false;
        let mut max_differences_len = 0usize;

        for handle in &followers {
            let mut follower = match handle.try_acquire() {
                Ok(guard) => guard,
                Err(_) => continue,
            };

            match drift::process_follower(&mut leader, &mut leader_pings, &mut follower).await {
                Ok(reseeked) => {
                    any_reseek |= reseeked;
                    max_differences_len =
                        max_differences_len.max(follower.current_track_differences.len());
                }
                Err(error) => {
                    tracing::warn!(host = %follower.endpoint, ?error, "drift measurement failed for this follower");
                }
            }
        }

        tokio::time::sleep(drift::next_sleep(any_reseek, max_differences_len)).await;
    }
}
