use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::state::ChatState;

/// Background sweep that evicts sessions idle for longer than the timeout.
pub struct IdleReaper {
    chat: Arc<ChatState>,
    idle_timeout: Duration,
    interval: Duration,
}

impl IdleReaper {
    pub fn new(chat: Arc<ChatState>, idle_timeout: Duration, interval: Duration) -> Self {
        Self {
            chat,
            idle_timeout,
            interval,
        }
    }

    /// Run one sweep as of `now`. Returns the number of sessions evicted.
    ///
    /// Staleness is re-checked per session at eviction time, so a line read
    /// after the snapshot keeps its session. Each evicted session gets a
    /// best-effort `ERR idle-timeout`; a failed notice never blocks eviction.
    pub fn reap_once(&self, now: Instant) -> usize {
        let stale = self
            .chat
            .registry()
            .snapshot_stale_sessions(now, self.idle_timeout);

        let mut evicted = 0;
        for session in stale {
            if !self.chat.evict_idle(session.id(), now, self.idle_timeout) {
                tracing::debug!(conn_id = %session.id(), "Session active or gone before eviction");
                continue;
            }
            evicted += 1;
            match &session.username {
                Some(name) => tracing::info!(
                    username = %name,
                    idle_secs = session.idle_for.as_secs(),
                    "User timed out (idle)"
                ),
                None => tracing::info!(
                    conn_id = %session.id(),
                    idle_secs = session.idle_for.as_secs(),
                    "Unauthenticated connection timed out (idle)"
                ),
            }
        }
        evicted
    }

    /// Sweep every `interval` until `shutdown` is cancelled.
    pub fn spawn(self, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await; // consume first immediate tick

            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let evicted = self.reap_once(Instant::now());
                        if evicted > 0 {
                            tracing::debug!(evicted, "Idle sweep");
                        }
                    }
                }
            }
            tracing::debug!("Idle reaper stopped");
        })
    }
}
