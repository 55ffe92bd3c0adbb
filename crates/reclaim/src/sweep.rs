use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use vanish_core::{Clock, DEFAULT_TTL_MS};
use vanish_store::{BlobStore, Deletion, Handle, ObjectInfo, StoreError};

use crate::error::ReclaimError;
use crate::metrics::ReclaimMetrics;

/// Tuning for [`Sweeper`].
#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// TTL assumed for records without persisted expiry metadata.
    pub default_ttl: Duration,
    /// Deletes in flight at once.
    pub concurrency: usize,
    /// Bound on each delete call.
    pub delete_timeout: Duration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_millis(DEFAULT_TTL_MS),
            concurrency: 4,
            delete_timeout: Duration::from_secs(10),
        }
    }
}

/// A record the sweep could not process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepFailure {
    pub handle: String,
    pub message: String,
}

/// Outcome of one sweep.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    /// Records seen in the listing.
    pub checked: u64,
    /// Expired records this sweep deleted.
    pub deleted: u64,
    /// Expired records that were gone by the time the sweep deleted them.
    pub already_gone: u64,
    /// Records not yet expired.
    pub live: u64,
    /// Records whose expiry could not be determined.
    pub skipped: Vec<String>,
    /// Per-record failures.
    pub errors: Vec<SweepFailure>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl SweepReport {
    fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            checked: 0,
            deleted: 0,
            already_gone: 0,
            live: 0,
            skipped: Vec::new(),
            errors: Vec::new(),
            started_at,
            finished_at: started_at,
        }
    }

    fn absorb(&mut self, outcome: RecordOutcome) {
        self.checked += 1;
        match outcome {
            RecordOutcome::Deleted => self.deleted += 1,
            RecordOutcome::AlreadyGone => self.already_gone += 1,
            RecordOutcome::Live => self.live += 1,
            RecordOutcome::Skipped(handle) => self.skipped.push(handle.to_string()),
            RecordOutcome::Failed { handle, message } => self.errors.push(SweepFailure {
                handle: handle.to_string(),
                message,
            }),
        }
    }
}

enum RecordOutcome {
    Deleted,
    AlreadyGone,
    Live,
    Skipped(Handle),
    Failed { handle: Handle, message: String },
}

/// Enumerates the store and deletes every record whose expiry has passed.
///
/// Expiry comes from persisted metadata when present, otherwise from the
/// backend's last-modified time plus the default TTL. Records with neither
/// are reported, never deleted. Safe to run concurrently with itself, with
/// expiry timers, and across instances sharing a store.
pub struct Sweeper {
    store: Arc<dyn BlobStore>,
    clock: Arc<dyn Clock>,
    config: SweepConfig,
    metrics: Arc<ReclaimMetrics>,
}

impl std::fmt::Debug for Sweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sweeper")
            .field("backend", &self.store.backend_name())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Sweeper {
    pub fn new(
        store: Arc<dyn BlobStore>,
        clock: Arc<dyn Clock>,
        config: SweepConfig,
        metrics: Arc<ReclaimMetrics>,
    ) -> Self {
        Self {
            store,
            clock,
            config,
            metrics,
        }
    }

    /// The clock sweeps are judged against.
    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Run one sweep.
    ///
    /// Fails only when the store cannot be listed; every per-record problem
    /// ends up in the report instead.
    pub async fn run(&self) -> Result<SweepReport, ReclaimError> {
        let now = self.clock.now();
        let mut report = SweepReport::new(now);
        debug!(backend = self.store.backend_name(), %now, "sweep starting");

        let mut outcomes = self
            .store
            .list()
            .map(|item| self.reclaim(item, now))
            .buffer_unordered(self.config.concurrency.max(1));

        while let Some(outcome) = outcomes.next().await {
            match outcome {
                Ok(outcome) => report.absorb(outcome),
                Err(e) => {
                    self.metrics.increment_sweep_fatal();
                    error!(error = %e, checked = report.checked, "sweep aborted");
                    return Err(e);
                }
            }
        }

        report.finished_at = self.clock.now();
        self.metrics
            .record_sweep(report.deleted, report.errors.len() as u64);
        info!(
            checked = report.checked,
            deleted = report.deleted,
            already_gone = report.already_gone,
            live = report.live,
            skipped = report.skipped.len(),
            errors = report.errors.len(),
            "sweep finished"
        );
        Ok(report)
    }

    async fn reclaim(
        &self,
        item: Result<ObjectInfo, StoreError>,
        now: DateTime<Utc>,
    ) -> Result<RecordOutcome, ReclaimError> {
        let info = match item {
            Ok(info) => info,
            Err(StoreError::Record { handle, source }) => {
                warn!(handle = %handle, error = %source, "unreadable record");
                return Ok(RecordOutcome::Failed {
                    handle,
                    message: source.to_string(),
                });
            }
            Err(e) => return Err(ReclaimError::Listing(e)),
        };

        let Some(expires_at) = info.expires_at(self.config.default_ttl) else {
            warn!(handle = %info.handle, "cannot determine expiry; skipping");
            return Ok(RecordOutcome::Skipped(info.handle));
        };
        if now < expires_at {
            return Ok(RecordOutcome::Live);
        }

        let handle = info.handle;
        match tokio::time::timeout(self.config.delete_timeout, self.store.delete(&handle)).await {
            Ok(Ok(Deletion::Removed)) => {
                debug!(handle = %handle, %expires_at, "expired upload deleted");
                Ok(RecordOutcome::Deleted)
            }
            Ok(Ok(Deletion::AlreadyGone)) => Ok(RecordOutcome::AlreadyGone),
            Ok(Err(e)) => {
                warn!(handle = %handle, error = %e, "delete failed");
                Ok(RecordOutcome::Failed {
                    handle,
                    message: e.to_string(),
                })
            }
            Err(_) => {
                warn!(handle = %handle, timeout = ?self.config.delete_timeout, "delete timed out");
                Ok(RecordOutcome::Failed {
                    handle,
                    message: format!(
                        "delete timed out after {:?}",
                        self.config.delete_timeout
                    ),
                })
            }
        }
    }
}

/// Run `sweeper` every `period` until `shutdown` is cancelled.
///
/// The first sweep happens one period after start unless `sweep_on_start`
/// is set. A failed sweep is logged and the loop carries on.
pub fn spawn_periodic_sweep(
    sweeper: Arc<Sweeper>,
    period: Duration,
    sweep_on_start: bool,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        if !sweep_on_start {
            // The first tick completes immediately.
            ticker.tick().await;
        }
        info!(period_secs = period.as_secs(), "periodic sweep started");

        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    info!("periodic sweep stopping");
                    break;
                }
                _ = ticker.tick() => {
                    match sweeper.run().await {
                        Ok(report) => {
                            debug!(deleted = report.deleted, "periodic sweep completed");
                        }
                        Err(e) => {
                            error!(error = %e, "periodic sweep failed");
                        }
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use chrono::TimeDelta;
    use vanish_core::{BlobId, BlobMetadata, ManualClock, StoredName};
    use vanish_store::testing::MemoryBlobStore;

    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    struct Fixture {
        store: Arc<MemoryBlobStore>,
        clock: Arc<ManualClock>,
        metrics: Arc<ReclaimMetrics>,
        sweeper: Sweeper,
    }

    fn fixture_with(store: MemoryBlobStore, config: SweepConfig) -> Fixture {
        let store = Arc::new(store);
        let clock = Arc::new(ManualClock::at_millis(1_700_000_000_000));
        let metrics = Arc::new(ReclaimMetrics::default());
        let sweeper = Sweeper::new(
            Arc::clone(&store) as Arc<dyn BlobStore>,
            Arc::clone(&clock) as Arc<dyn Clock>,
            config,
            Arc::clone(&metrics),
        );
        Fixture {
            store,
            clock,
            metrics,
            sweeper,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(MemoryBlobStore::new(), SweepConfig::default())
    }

    async fn upload(fx: &Fixture, ttl: Duration) -> Handle {
        let meta = BlobMetadata::new(
            StoredName::for_upload(BlobId::new(), "a.txt"),
            "a.txt",
            "text/plain",
            1,
            fx.clock.now(),
            ttl,
        );
        fx.store.put(&meta, Bytes::from_static(b"a")).await.unwrap()
    }

    #[tokio::test]
    async fn deletes_exactly_the_expired_records() {
        let fx = fixture();
        let expired_a = upload(&fx, Duration::from_secs(10)).await;
        let expired_b = upload(&fx, Duration::from_secs(60)).await;
        let live = upload(&fx, Duration::from_secs(600)).await;

        fx.clock.advance(Duration::from_secs(60));
        let report = fx.sweeper.run().await.unwrap();

        assert_eq!(report.checked, 3);
        assert_eq!(report.deleted, 2);
        assert_eq!(report.live, 1);
        assert!(report.errors.is_empty());
        assert!(!fx.store.contains(&expired_a));
        assert!(!fx.store.contains(&expired_b));
        assert!(fx.store.contains(&live));
    }

    #[tokio::test]
    async fn second_run_finds_nothing_to_do() {
        let fx = fixture();
        upload(&fx, TTL).await;
        upload(&fx, TTL).await;
        fx.clock.advance(Duration::from_secs(61));

        assert_eq!(fx.sweeper.run().await.unwrap().deleted, 2);
        let again = fx.sweeper.run().await.unwrap();
        assert_eq!(again.deleted, 0);
        assert_eq!(again.checked, 0);
        assert!(again.errors.is_empty());
        assert_eq!(fx.metrics.snapshot().sweep_runs, 2);
        assert_eq!(fx.metrics.snapshot().sweep_deletions, 2);
    }

    #[tokio::test]
    async fn stale_listing_counts_already_gone() {
        let fx = fixture_with(MemoryBlobStore::new().with_stale_listing(), SweepConfig::default());
        upload(&fx, TTL).await;
        fx.clock.advance(Duration::from_secs(61));

        assert_eq!(fx.sweeper.run().await.unwrap().deleted, 1);
        let again = fx.sweeper.run().await.unwrap();
        assert_eq!(again.deleted, 0);
        assert_eq!(again.already_gone, 1);
        assert!(again.errors.is_empty());
    }

    #[tokio::test]
    async fn expiry_boundary_is_inclusive() {
        let fx = fixture();
        let handle = upload(&fx, TTL).await;

        fx.clock.advance(TTL - Duration::from_millis(1));
        assert_eq!(fx.sweeper.run().await.unwrap().live, 1);

        fx.clock.advance(Duration::from_millis(1));
        assert_eq!(fx.sweeper.run().await.unwrap().deleted, 1);
        assert!(!fx.store.contains(&handle));
    }

    #[tokio::test]
    async fn falls_back_to_last_modified() {
        let fx = fixture();
        let handle = fx.store.insert_raw(
            "legacy.bin",
            None,
            Some(fx.clock.now()),
            Bytes::from_static(b"x"),
        );

        fx.clock.advance(Duration::from_secs(59));
        assert_eq!(fx.sweeper.run().await.unwrap().live, 1);

        fx.clock.advance(Duration::from_secs(2));
        let report = fx.sweeper.run().await.unwrap();
        assert_eq!(report.deleted, 1);
        assert!(!fx.store.contains(&handle));
    }

    #[tokio::test]
    async fn undeterminable_expiry_is_skipped() {
        let fx = fixture();
        let handle = fx
            .store
            .insert_raw("mystery.bin", None, None, Bytes::from_static(b"?"));
        fx.clock.advance(Duration::from_secs(3600));

        let report = fx.sweeper.run().await.unwrap();
        assert_eq!(report.checked, 1);
        assert_eq!(report.deleted, 0);
        assert_eq!(report.skipped, vec![handle.to_string()]);
        assert!(fx.store.contains(&handle));
    }

    #[tokio::test]
    async fn one_failing_delete_does_not_stop_the_rest() {
        let fx = fixture();
        let broken = upload(&fx, TTL).await;
        upload(&fx, TTL).await;
        upload(&fx, TTL).await;
        fx.store.fail_deletes(&broken, "permission denied");
        fx.clock.advance(Duration::from_secs(61));

        let report = fx.sweeper.run().await.unwrap();
        assert_eq!(report.checked, 3);
        assert_eq!(report.deleted, 2);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].handle, broken.to_string());
        assert!(report.errors[0].message.contains("permission denied"));
        assert_eq!(fx.store.len(), 1);
        assert_eq!(fx.metrics.snapshot().sweep_errors, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_delete_is_bounded() {
        let fx = fixture_with(
            MemoryBlobStore::new(),
            SweepConfig {
                delete_timeout: Duration::from_secs(2),
                ..SweepConfig::default()
            },
        );
        let stuck = upload(&fx, TTL).await;
        let other = upload(&fx, TTL).await;
        fx.store.hang_deletes(&stuck);
        fx.clock.advance(Duration::from_secs(61));

        let report = fx.sweeper.run().await.unwrap();
        assert_eq!(report.deleted, 1);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].message.contains("timed out"));
        assert!(!fx.store.contains(&other));
    }

    #[tokio::test]
    async fn per_record_listing_error_is_reported() {
        let fx = fixture();
        let handle = upload(&fx, TTL).await;
        fx.store.fail_listing_record(&handle, "head failed");

        let report = fx.sweeper.run().await.unwrap();
        assert_eq!(report.checked, 1);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].message.contains("head failed"));
    }

    #[tokio::test]
    async fn listing_failure_is_fatal() {
        let fx = fixture();
        upload(&fx, TTL).await;
        fx.store.fail_listing(true);

        let err = fx.sweeper.run().await.unwrap_err();
        assert!(matches!(err, ReclaimError::Listing(StoreError::BackendUnavailable(_))));
        assert_eq!(fx.metrics.snapshot().sweep_fatal, 1);
        assert_eq!(fx.metrics.snapshot().sweep_runs, 0);
    }

    #[tokio::test]
    async fn overlapping_sweeps_never_double_report() {
        let fx = fixture();
        for _ in 0..10 {
            upload(&fx, TTL).await;
        }
        fx.clock.advance(Duration::from_secs(61));

        let (a, b) = tokio::join!(fx.sweeper.run(), fx.sweeper.run());
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(a.deleted + b.deleted, 10);
        assert!(a.errors.is_empty() && b.errors.is_empty());
        assert!(fx.store.is_empty());
    }

    #[tokio::test]
    async fn report_serializes_for_the_cleanup_endpoint() {
        let fx = fixture();
        upload(&fx, TTL).await;
        fx.clock.advance(Duration::from_secs(61));

        let report = fx.sweeper.run().await.unwrap();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["checked"], 1);
        assert_eq!(json["alreadyGone"], 0);
        assert!(json["startedAt"].is_string());
        assert_eq!(
            report.started_at,
            DateTime::from_timestamp_millis(1_700_000_061_000).unwrap()
        );
        assert!(report.finished_at - report.started_at >= TimeDelta::zero());
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_sweep_runs_on_schedule_and_stops() {
        let fx = fixture();
        let handle = upload(&fx, Duration::ZERO).await;
        let shutdown = CancellationToken::new();
        let sweeper = Arc::new(fx.sweeper);

        let task = spawn_periodic_sweep(
            Arc::clone(&sweeper),
            Duration::from_secs(60),
            false,
            shutdown.clone(),
        );

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(fx.store.contains(&handle));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(!fx.store.contains(&handle));
        assert_eq!(fx.metrics.snapshot().sweep_runs, 1);

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_sweep_can_run_on_start() {
        let fx = fixture();
        let handle = upload(&fx, Duration::ZERO).await;
        let shutdown = CancellationToken::new();

        let task = spawn_periodic_sweep(
            Arc::new(fx.sweeper),
            Duration::from_secs(60),
            true,
            shutdown.clone(),
        );

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!fx.store.contains(&handle));

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_sweep_survives_fatal_runs() {
        let fx = fixture();
        fx.store.fail_listing(true);
        let shutdown = CancellationToken::new();

        let task = spawn_periodic_sweep(
            Arc::new(fx.sweeper),
            Duration::from_secs(60),
            true,
            shutdown.clone(),
        );

        tokio::time::sleep(Duration::from_secs(125)).await;
        assert_eq!(fx.metrics.snapshot().sweep_fatal, 3);

        shutdown.cancel();
        task.await.unwrap();
    }
}
