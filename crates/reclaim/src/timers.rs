use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use vanish_core::Clock;
use vanish_store::{BlobStore, Deletion, Handle};

use crate::metrics::ReclaimMetrics;

const DEFAULT_DELETE_TIMEOUT: Duration = Duration::from_secs(10);

/// In-process expiry timers, one per registered upload.
///
/// Each timer sleeps until the upload's expiry and then deletes it once.
/// Timers are best effort: they vanish with the process, and a failed
/// delete is only logged. The sweep remains responsible for anything a
/// timer misses.
pub struct ExpiryTimers {
    store: Arc<dyn BlobStore>,
    clock: Arc<dyn Clock>,
    metrics: Arc<ReclaimMetrics>,
    delete_timeout: Duration,
    pending: Arc<DashMap<Handle, (u64, CancellationToken)>>,
    next_id: AtomicU64,
    root: CancellationToken,
    tracker: TaskTracker,
}

impl std::fmt::Debug for ExpiryTimers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpiryTimers")
            .field("backend", &self.store.backend_name())
            .field("pending", &self.pending.len())
            .field("delete_timeout", &self.delete_timeout)
            .finish_non_exhaustive()
    }
}

impl ExpiryTimers {
    pub fn new(
        store: Arc<dyn BlobStore>,
        clock: Arc<dyn Clock>,
        metrics: Arc<ReclaimMetrics>,
    ) -> Self {
        Self {
            store,
            clock,
            metrics,
            delete_timeout: DEFAULT_DELETE_TIMEOUT,
            pending: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(0),
            root: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Bound each timer's delete call.
    #[must_use]
    pub fn with_delete_timeout(mut self, timeout: Duration) -> Self {
        self.delete_timeout = timeout;
        self
    }

    /// Schedule `handle` for deletion at `expires_at`.
    ///
    /// An expiry in the past fires immediately. Registering a handle that
    /// already has a timer replaces it. Must be called inside a Tokio
    /// runtime.
    pub fn register(&self, handle: Handle, expires_at: DateTime<Utc>) {
        let delay = (expires_at - self.clock.now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = self.root.child_token();

        if let Some((_, previous)) = self.pending.insert(handle.clone(), (id, token.clone())) {
            previous.cancel();
        }
        debug!(handle = %handle, delay_ms = delay.as_millis(), "expiry timer registered");

        let store = Arc::clone(&self.store);
        let metrics = Arc::clone(&self.metrics);
        let pending = Arc::clone(&self.pending);
        let delete_timeout = self.delete_timeout;

        self.tracker.spawn(async move {
            tokio::select! {
                () = token.cancelled() => {
                    debug!(handle = %handle, "expiry timer cancelled");
                }
                () = tokio::time::sleep(delay) => {
                    fire(store.as_ref(), &handle, delete_timeout, &metrics).await;
                }
            }
            pending.remove_if(&handle, |_, (entry_id, _)| *entry_id == id);
        });
    }

    /// Cancel the timer for `handle`. Returns whether one was pending.
    ///
    /// Best effort: a timer already deleting is not interrupted.
    pub fn cancel(&self, handle: &Handle) -> bool {
        match self.pending.remove(handle) {
            Some((_, (_, token))) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Number of timers that have not fired or been cancelled yet.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Cancel every pending timer and wait for their tasks to finish.
    ///
    /// Uploads whose timers are cancelled here are left to the sweep.
    pub async fn shutdown(&self) {
        let abandoned = self.pending.len();
        self.root.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        self.pending.clear();
        info!(abandoned, "expiry timers stopped");
    }
}

async fn fire(store: &dyn BlobStore, handle: &Handle, limit: Duration, metrics: &ReclaimMetrics) {
    match tokio::time::timeout(limit, store.delete(handle)).await {
        Ok(Ok(Deletion::Removed)) => {
            metrics.increment_timer_deletions();
            info!(handle = %handle, "expired upload deleted");
        }
        Ok(Ok(Deletion::AlreadyGone)) => {
            metrics.increment_timer_noops();
            debug!(handle = %handle, "expired upload already gone");
        }
        Ok(Err(e)) => {
            metrics.increment_timer_failures();
            warn!(handle = %handle, error = %e, "expiry timer delete failed; leaving to sweep");
        }
        Err(_) => {
            metrics.increment_timer_failures();
            warn!(handle = %handle, timeout = ?limit, "expiry timer delete timed out; leaving to sweep");
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use vanish_core::{BlobId, BlobMetadata, ManualClock, StoredName};
    use vanish_store::testing::MemoryBlobStore;

    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    struct Fixture {
        store: Arc<MemoryBlobStore>,
        clock: Arc<ManualClock>,
        metrics: Arc<ReclaimMetrics>,
        timers: ExpiryTimers,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryBlobStore::new());
        let clock = Arc::new(ManualClock::at_millis(1_700_000_000_000));
        let metrics = Arc::new(ReclaimMetrics::default());
        let timers = ExpiryTimers::new(
            Arc::clone(&store) as Arc<dyn BlobStore>,
            Arc::clone(&clock) as Arc<dyn Clock>,
            Arc::clone(&metrics),
        );
        Fixture {
            store,
            clock,
            metrics,
            timers,
        }
    }

    async fn upload(fx: &Fixture, ttl: Duration) -> (Handle, DateTime<Utc>) {
        let meta = BlobMetadata::new(
            StoredName::for_upload(BlobId::new(), "note.txt"),
            "note.txt",
            "text/plain",
            4,
            fx.clock.now(),
            ttl,
        );
        let handle = fx.store.put(&meta, Bytes::from_static(b"note")).await.unwrap();
        (handle, meta.expires_at)
    }

    #[tokio::test(start_paused = true)]
    async fn deletes_at_expiry_and_not_before() {
        let fx = fixture();
        let (handle, expires_at) = upload(&fx, TTL).await;
        fx.timers.register(handle.clone(), expires_at);
        assert_eq!(fx.timers.pending(), 1);

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert!(fx.store.contains(&handle));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!fx.store.contains(&handle));
        assert_eq!(fx.timers.pending(), 0);
        assert_eq!(fx.metrics.snapshot().timer_deletions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn firing_after_the_sweep_is_a_noop() {
        let fx = fixture();
        let (handle, expires_at) = upload(&fx, TTL).await;
        fx.timers.register(handle.clone(), expires_at);
        fx.store.delete(&handle).await.unwrap();

        tokio::time::sleep(Duration::from_secs(61)).await;
        let snap = fx.metrics.snapshot();
        assert_eq!(snap.timer_noops, 1);
        assert_eq!(snap.timer_failures, 0);
        assert_eq!(snap.timer_deletions, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_delete_is_left_in_place() {
        let fx = fixture();
        let (handle, expires_at) = upload(&fx, TTL).await;
        fx.store.fail_deletes(&handle, "disk on fire");
        fx.timers.register(handle.clone(), expires_at);

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(fx.store.contains(&handle));
        assert_eq!(fx.metrics.snapshot().timer_failures, 1);
        assert_eq!(fx.timers.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_delete_times_out() {
        let fx = fixture();
        let timers = ExpiryTimers::new(
            Arc::clone(&fx.store) as Arc<dyn BlobStore>,
            Arc::clone(&fx.clock) as Arc<dyn Clock>,
            Arc::clone(&fx.metrics),
        )
        .with_delete_timeout(Duration::from_secs(5));
        let (handle, expires_at) = upload(&fx, TTL).await;
        fx.store.hang_deletes(&handle);
        timers.register(handle, expires_at);

        tokio::time::sleep(Duration::from_secs(70)).await;
        assert_eq!(fx.metrics.snapshot().timer_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_timer_never_fires() {
        let fx = fixture();
        let (handle, expires_at) = upload(&fx, TTL).await;
        fx.timers.register(handle.clone(), expires_at);

        assert!(fx.timers.cancel(&handle));
        assert!(!fx.timers.cancel(&handle));
        assert_eq!(fx.timers.pending(), 0);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(fx.store.contains(&handle));
    }

    #[tokio::test(start_paused = true)]
    async fn reregistering_replaces_the_older_timer() {
        let fx = fixture();
        let (handle, _) = upload(&fx, TTL).await;
        let now = fx.clock.now();
        fx.timers
            .register(handle.clone(), now + chrono::TimeDelta::seconds(10));
        fx.timers
            .register(handle.clone(), now + chrono::TimeDelta::seconds(100));
        assert_eq!(fx.timers.pending(), 1);

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(fx.store.contains(&handle));
        assert_eq!(fx.timers.pending(), 1);

        tokio::time::sleep(Duration::from_secs(90)).await;
        assert!(!fx.store.contains(&handle));
    }

    #[tokio::test(start_paused = true)]
    async fn past_expiry_fires_immediately() {
        let fx = fixture();
        let (handle, expires_at) = upload(&fx, TTL).await;
        fx.clock.advance(Duration::from_secs(120));
        fx.timers.register(handle.clone(), expires_at);

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(!fx.store.contains(&handle));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_everything() {
        let fx = fixture();
        let (first, first_expiry) = upload(&fx, TTL).await;
        let (second, second_expiry) = upload(&fx, TTL).await;
        fx.timers.register(first.clone(), first_expiry);
        fx.timers.register(second.clone(), second_expiry);

        fx.timers.shutdown().await;
        assert_eq!(fx.timers.pending(), 0);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(fx.store.contains(&first));
        assert!(fx.store.contains(&second));
    }
}
