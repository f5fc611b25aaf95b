//! Background expiry sweep.
//!
//! Periodically evicts expired sessions and replay entries from the
//! store.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::replay::ReplayCache;

use super::store::SessionStore;

/// Default cleanup interval in seconds.
pub const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 300; // 5 minutes

/// Spawn a background task that periodically cleans up expired sessions
/// and replay entries.
///
/// Returns a `JoinHandle` that can be used to abort the task.
pub fn spawn_cleanup_task(
    store: Arc<SessionStore>,
    replay: ReplayCache,
    cleanup_interval_secs: u64,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(cleanup_interval_secs));

        // Skip the first immediate tick
        ticker.tick().await;

        loop {
            ticker.tick().await;

            match store.evict_expired() {
                Ok(count) if count > 0 => {
                    info!(evicted = count, "Session cleanup completed");
                }
                Ok(_) => debug!("Session cleanup: nothing expired"),
                Err(e) => warn!(error = %e, "Session cleanup failed"),
            }

            match replay.evict_expired() {
                Ok(count) if count > 0 => {
                    debug!(evicted = count, "Replay cache cleanup completed");
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Replay cache cleanup failed"),
            }

            match store.session_count() {
                Ok(count) => debug!(active_sessions = count, "Session store status"),
                Err(e) => debug!(error = %e, "Failed to get session count"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::types::Session;
    use chrono::Utc;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_cleanup_task_sweeps_expired_state() {
        let dir = tempdir().unwrap();
        let store = Arc::new(SessionStore::open(dir.path().join("sessions.redb"), 3600).unwrap());
        let replay = store.replay_cache().unwrap();

        // One live session, one expired, one stale replay entry.
        let live = Session::new(
            "live".to_string(),
            "https://sp.example.com".to_string(),
            "https://idp.example.com".to_string(),
            3600,
        );
        store.create(live).unwrap();

        let mut stale = Session::new(
            "stale".to_string(),
            "https://sp.example.com".to_string(),
            "https://idp.example.com".to_string(),
            3600,
        );
        stale.expires_at = Utc::now() - chrono::Duration::seconds(10);
        store.create(stale).unwrap();

        replay
            .check_and_mark("old-assertion", Utc::now() - chrono::Duration::seconds(10))
            .unwrap();

        let handle = spawn_cleanup_task(Arc::clone(&store), replay.clone(), 1);
        tokio::time::sleep(Duration::from_secs(2)).await;
        handle.abort();

        assert_eq!(store.session_count().unwrap(), 1);
        assert!(!replay.contains("old-assertion").unwrap());
    }
}
