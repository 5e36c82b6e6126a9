//! Retrieval engine
//!
//! Turns a frozen [`DivisionTree`](crate::division::DivisionTree) into stored
//! snapshots, one cycle at a time:
//!
//! - **fetcher**: the [`Fetcher`] capability and its HTTP implementation
//! - **scheduler**: one jittered, permit-limited task per node per cycle
//! - **harvester**: runs a cycle at startup and then on every interval tick
//!
//! ```text
//! Traversal ──► RetrievalScheduler ──► Fetcher ──► SnapshotStore
//!                 │ jitter [0, max)
//!                 │ permit pool
//!                 └ CancellationToken
//! ```
//!
//! Failures are isolated per node: a failed fetch or store is logged and
//! counted in the [`CycleReport`], and the node is tried again next cycle.

mod fetcher;
mod harvester;
mod scheduler;

pub use fetcher::{Fetcher, HttpFetcher};
pub use harvester::Harvester;
pub use scheduler::{CycleReport, NodeOutcome, RetrievalScheduler, SchedulerConfig};
