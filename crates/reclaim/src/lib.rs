//! Reclaiming expired uploads.
//!
//! Two mechanisms, each sufficient on its own:
//!
//! - [`ExpiryTimers`]: one cancellable task per upload that deletes it when
//!   it expires. Fast, but lost on restart and only meaningful for stores
//!   local to this process.
//! - [`Sweeper`]: enumerates the store and deletes everything whose
//!   persisted expiry has passed. This is the system of record; run it
//!   periodically with [`spawn_periodic_sweep`] or on demand.

pub mod error;
pub mod metrics;
pub mod sweep;
pub mod timers;

pub use error::ReclaimError;
pub use metrics::{ReclaimMetrics, ReclaimMetricsSnapshot};
pub use sweep::{SweepConfig, SweepFailure, SweepReport, Sweeper, spawn_periodic_sweep};
pub use timers::ExpiryTimers;
