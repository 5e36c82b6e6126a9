//! Retrieval scheduler
//!
//! Each cycle drains a fresh [`Traversal`] and spawns one task per node. A
//! task sleeps a random jitter, takes a permit from the shared pool, fetches
//! the node's URL and stores the payload under the current instant.

use super::Fetcher;
use crate::config::{DEFAULT_MAX_CONCURRENT_FETCHES, DEFAULT_MAX_JITTER};
use crate::database::{ObservedAt, SnapshotStore};
use crate::division::{DivisionTree, NodeId, Traversal};
use rand::Rng;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Scheduling limits for a retrieval cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Upper bound (exclusive) of the random delay before each fetch
    pub max_jitter: Duration,
    /// Fetches allowed in flight at once, across overlapping cycles; 0 is unbounded
    pub max_concurrent_fetches: usize,
}

impl SchedulerConfig {
    pub fn with_max_jitter(mut self, max_jitter: Duration) -> Self {
        self.max_jitter = max_jitter;
        self
    }

    pub fn with_max_concurrent_fetches(mut self, max_concurrent_fetches: usize) -> Self {
        self.max_concurrent_fetches = max_concurrent_fetches;
        self
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_jitter: DEFAULT_MAX_JITTER,
            max_concurrent_fetches: DEFAULT_MAX_CONCURRENT_FETCHES,
        }
    }
}

/// How one node's retrieval ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeOutcome {
    Stored,
    FetchFailed,
    StoreFailed,
    /// The cycle was cancelled before the fetch started
    Cancelled,
    /// The task panicked
    Aborted,
}

/// Counters for one finished cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub cycle: u64,
    pub scheduled: usize,
    pub stored: usize,
    pub fetch_failures: usize,
    pub store_failures: usize,
    pub cancelled: usize,
    pub aborted: usize,
    pub elapsed: Duration,
}

impl CycleReport {
    fn record(&mut self, outcome: NodeOutcome) {
        match outcome {
            NodeOutcome::Stored => self.stored += 1,
            NodeOutcome::FetchFailed => self.fetch_failures += 1,
            NodeOutcome::StoreFailed => self.store_failures += 1,
            NodeOutcome::Cancelled => self.cancelled += 1,
            NodeOutcome::Aborted => self.aborted += 1,
        }
    }

    /// Nodes that ended without a stored snapshot
    pub fn failures(&self) -> usize {
        self.fetch_failures + self.store_failures + self.aborted
    }
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cycle {}: {} scheduled, {} stored, {} fetch failures, {} store failures, {} cancelled in {:.1?}",
            self.cycle,
            self.scheduled,
            self.stored,
            self.fetch_failures,
            self.store_failures,
            self.cancelled,
            self.elapsed
        )?;
        if self.aborted > 0 {
            write!(f, " ({} aborted)", self.aborted)?;
        }
        Ok(())
    }
}

/// Fetches every node of a tree and stores the results
///
/// The permit pool is shared by all cycles run through the same scheduler.
pub struct RetrievalScheduler {
    tree: Arc<DivisionTree>,
    fetcher: Arc<dyn Fetcher>,
    store: Arc<dyn SnapshotStore>,
    config: SchedulerConfig,
    permits: Option<Arc<Semaphore>>,
    cycles: AtomicU64,
}

impl RetrievalScheduler {
    pub fn new(
        tree: Arc<DivisionTree>,
        fetcher: Arc<dyn Fetcher>,
        store: Arc<dyn SnapshotStore>,
        config: SchedulerConfig,
    ) -> Self {
        let permits = match config.max_concurrent_fetches {
            0 => None,
            n => Some(Arc::new(Semaphore::new(n))),
        };
        Self {
            tree,
            fetcher,
            store,
            config,
            permits,
            cycles: AtomicU64::new(0),
        }
    }

    pub fn tree(&self) -> &Arc<DivisionTree> {
        &self.tree
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Run one retrieval cycle over the whole tree
    ///
    /// Returns once every node task has stored, failed, or been cancelled.
    pub async fn run_cycle(&self, cancel: CancellationToken) -> CycleReport {
        let cycle = self.cycles.fetch_add(1, Ordering::Relaxed) + 1;
        let started = Instant::now();
        info!(
            "Starting retrieval cycle {} over {} nodes",
            cycle,
            self.tree.len()
        );

        let mut report = CycleReport {
            cycle,
            ..Default::default()
        };
        let mut tasks = JoinSet::new();
        let mut traversal = Traversal::start(Arc::clone(&self.tree));
        while let Some(id) = traversal.next().await {
            tasks.spawn(self.node_task(id, cancel.clone()).run());
            report.scheduled += 1;
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => report.record(outcome),
                Err(e) => {
                    error!("Retrieval task failed: {}", e);
                    report.record(NodeOutcome::Aborted);
                }
            }
        }

        report.elapsed = started.elapsed();
        info!("Finished retrieval {}", report);
        report
    }

    fn node_task(&self, id: NodeId, cancel: CancellationToken) -> NodeTask {
        NodeTask {
            path: self.tree.path(id),
            url: self.tree.url(id),
            delay: self.jitter(),
            fetcher: Arc::clone(&self.fetcher),
            store: Arc::clone(&self.store),
            permits: self.permits.clone(),
            cancel,
        }
    }

    /// Uniform delay in `[0, max_jitter)` at millisecond granularity
    fn jitter(&self) -> Duration {
        let max_ms = self.config.max_jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..max_ms))
    }
}

/// Everything one node's task needs, detached from the scheduler
struct NodeTask {
    path: String,
    url: String,
    delay: Duration,
    fetcher: Arc<dyn Fetcher>,
    store: Arc<dyn SnapshotStore>,
    permits: Option<Arc<Semaphore>>,
    cancel: CancellationToken,
}

impl NodeTask {
    async fn run(self) -> NodeOutcome {
        let NodeTask {
            path,
            url,
            delay,
            fetcher,
            store,
            permits,
            cancel,
        } = self;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return NodeOutcome::Cancelled,
            _ = tokio::time::sleep(delay) => {}
        }

        let _permit = match permits {
            Some(permits) => tokio::select! {
                biased;
                _ = cancel.cancelled() => return NodeOutcome::Cancelled,
                permit = permits.acquire_owned() => match permit {
                    Ok(permit) => Some(permit),
                    Err(_) => return NodeOutcome::Cancelled,
                },
            },
            None => None,
        };

        debug!("Fetching {} from {}", path, url);
        let outcome = tokio::task::spawn_blocking(move || {
            let payload = match fetcher.fetch(&url) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!("Skipping {}: {}", path, e);
                    return NodeOutcome::FetchFailed;
                }
            };

            match store.put(&path, ObservedAt::now(), &payload) {
                Ok(()) => {
                    debug!("Stored {} bytes for {}", payload.len(), path);
                    NodeOutcome::Stored
                }
                Err(e) => {
                    error!("Failed to store snapshot for {}: {}", path, e);
                    NodeOutcome::StoreFailed
                }
            }
        })
        .await;

        outcome.unwrap_or_else(|e| {
            error!("Fetch task panicked: {}", e);
            NodeOutcome::Aborted
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{MemorySnapshotStore, SnapshotSelector};
    use crate::division::{Level, RawRecord, StaticDivisionSource, TreeLoader};
    use anyhow::{anyhow, Result};
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;

    const TEMPLATE: &str = "http://results.test/{path}/info.json";

    fn tree() -> Arc<DivisionTree> {
        let source = StaticDivisionSource::new()
            .with_level(Level::Country, vec![RawRecord::new("ES", "España", "")])
            .with_level(Level::Region, vec![RawRecord::new("CA02", "Aragón", "ES")])
            .with_level(Level::Province, vec![RawRecord::new("50", "Zaragoza", "CA02")])
            .with_level(
                Level::Municipality,
                vec![
                    RawRecord::new("50297", "Zaragoza", "50"),
                    RawRecord::new("50001", "Abanto", "50"),
                ],
            )
            .with_level(
                Level::District,
                vec![
                    RawRecord::new("5029701", "Distrito 1", "50297"),
                    RawRecord::new("5029702", "Distrito 2", "50297"),
                ],
            );
        Arc::new(TreeLoader::new(source, TEMPLATE).load().unwrap())
    }

    /// Serves `{"url": ...}` for every URL except those containing a failing fragment
    #[derive(Default)]
    struct StubFetcher {
        failing: HashSet<String>,
        calls: AtomicUsize,
    }

    impl StubFetcher {
        fn failing(fragments: &[&str]) -> Self {
            Self {
                failing: fragments.iter().map(|f| f.to_string()).collect(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl Fetcher for StubFetcher {
        fn fetch(&self, url: &str) -> Result<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.iter().any(|f| url.contains(f.as_str())) {
                return Err(anyhow!("status code 503"));
            }
            Ok(format!(r#"{{"url":"{}"}}"#, url).into_bytes())
        }
    }

    /// Holds every fetch for a moment and records the most fetches in flight
    #[derive(Default)]
    struct SlowFetcher {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl Fetcher for SlowFetcher {
        fn fetch(&self, url: &str) -> Result<Vec<u8>> {
            let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(running, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(25));
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(url.as_bytes().to_vec())
        }
    }

    struct RejectingStore {
        inner: MemorySnapshotStore,
        rejected: &'static str,
    }

    impl SnapshotStore for RejectingStore {
        fn put(&self, path: &str, observed_at: ObservedAt, payload: &[u8]) -> Result<()> {
            if path == self.rejected {
                return Err(anyhow!("disk full"));
            }
            self.inner.put(path, observed_at, payload)
        }

        fn get(
            &self,
            path: &str,
            selector: SnapshotSelector,
        ) -> Result<Option<crate::database::StoredSnapshot>> {
            self.inner.get(path, selector)
        }

        fn partitions(&self) -> Result<Vec<crate::database::PartitionStats>> {
            self.inner.partitions()
        }

        fn snapshots(&self, path: &str) -> Result<Vec<crate::database::StoredSnapshot>> {
            self.inner.snapshots(path)
        }

        fn for_each_snapshot(
            &self,
            visit: &mut dyn FnMut(crate::database::StoredSnapshot) -> Result<()>,
        ) -> Result<()> {
            self.inner.for_each_snapshot(visit)
        }
    }

    fn no_jitter() -> SchedulerConfig {
        SchedulerConfig::default().with_max_jitter(Duration::ZERO)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cycle_stores_every_node() {
        let tree = tree();
        let store = Arc::new(MemorySnapshotStore::new());
        let scheduler = RetrievalScheduler::new(
            Arc::clone(&tree),
            Arc::new(StubFetcher::default()),
            store.clone(),
            no_jitter(),
        );

        let report = scheduler.run_cycle(CancellationToken::new()).await;
        assert_eq!(report.cycle, 1);
        assert_eq!(report.scheduled, tree.len());
        assert_eq!(report.stored, tree.len());
        assert_eq!(report.failures(), 0);

        let latest = store
            .get("ES/CA02/50/50297/5029701", SnapshotSelector::Latest)
            .unwrap()
            .unwrap();
        assert_eq!(
            latest.payload,
            br#"{"url":"http://results.test/ES/CA02/50/50297/5029701/info.json"}"#
        );

        let second = scheduler.run_cycle(CancellationToken::new()).await;
        assert_eq!(second.cycle, 2);
        assert_eq!(store.snapshots("ES").unwrap().len(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_fetch_failure_is_isolated() {
        let tree = tree();
        let store = Arc::new(MemorySnapshotStore::new());
        let scheduler = RetrievalScheduler::new(
            Arc::clone(&tree),
            Arc::new(StubFetcher::failing(&["/5029701/"])),
            store.clone(),
            no_jitter().with_max_concurrent_fetches(1),
        );

        let report = scheduler.run_cycle(CancellationToken::new()).await;
        assert_eq!(report.fetch_failures, 1);
        assert_eq!(report.stored, tree.len() - 1);

        assert!(store
            .get("ES/CA02/50/50297/5029701", SnapshotSelector::Latest)
            .unwrap()
            .is_none());
        assert!(store
            .get("ES/CA02/50/50297/5029702", SnapshotSelector::Latest)
            .unwrap()
            .is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_overlapping_cycles_share_the_fetch_limit() {
        let tree = tree();
        let store = Arc::new(MemorySnapshotStore::new());
        let fetcher = Arc::new(SlowFetcher::default());
        let scheduler = RetrievalScheduler::new(
            Arc::clone(&tree),
            fetcher.clone(),
            store.clone(),
            no_jitter().with_max_concurrent_fetches(2),
        );

        let (first, second) = tokio::join!(
            scheduler.run_cycle(CancellationToken::new()),
            scheduler.run_cycle(CancellationToken::new())
        );
        assert_eq!(first.stored, tree.len());
        assert_eq!(second.stored, tree.len());
        assert_eq!(first.failures() + second.failures(), 0);

        let peak = fetcher.peak.load(Ordering::SeqCst);
        assert!((1..=2).contains(&peak), "peak of {} fetches in flight", peak);

        let partitions = store.partitions().unwrap();
        assert_eq!(partitions.len(), tree.len());
        for partition in partitions {
            assert_eq!(partition.snapshot_count, 2, "{}", partition.path);
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_store_failure_is_counted() {
        let tree = tree();
        let store = Arc::new(RejectingStore {
            inner: MemorySnapshotStore::new(),
            rejected: "ES/CA02/50/50001",
        });
        let scheduler = RetrievalScheduler::new(
            Arc::clone(&tree),
            Arc::new(StubFetcher::default()),
            store.clone(),
            no_jitter().with_max_concurrent_fetches(0),
        );

        let report = scheduler.run_cycle(CancellationToken::new()).await;
        assert_eq!(report.store_failures, 1);
        assert_eq!(report.stored, tree.len() - 1);
        assert_eq!(store.partitions().unwrap().len(), tree.len() - 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cancelled_cycle_stores_nothing() {
        let tree = tree();
        let store = Arc::new(MemorySnapshotStore::new());
        let fetcher = Arc::new(StubFetcher::default());
        let scheduler = Arc::new(RetrievalScheduler::new(
            Arc::clone(&tree),
            fetcher.clone(),
            store.clone(),
            SchedulerConfig::default().with_max_jitter(Duration::from_secs(3600)),
        ));

        let cancel = CancellationToken::new();
        let cycle = {
            let scheduler = Arc::clone(&scheduler);
            let cancel = cancel.clone();
            tokio::spawn(async move { scheduler.run_cycle(cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        let report = tokio::time::timeout(Duration::from_secs(5), cycle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.cancelled, report.scheduled);
        assert_eq!(report.stored, 0);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
        assert!(store.partitions().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_precancelled_token() {
        let tree = tree();
        let scheduler = RetrievalScheduler::new(
            Arc::clone(&tree),
            Arc::new(StubFetcher::default()),
            Arc::new(MemorySnapshotStore::new()),
            no_jitter(),
        );

        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = scheduler.run_cycle(cancel).await;
        assert_eq!(report.cancelled, tree.len());
    }

    #[test]
    fn test_jitter_bounds() {
        let scheduler = RetrievalScheduler::new(
            tree(),
            Arc::new(StubFetcher::default()),
            Arc::new(MemorySnapshotStore::new()),
            SchedulerConfig::default().with_max_jitter(Duration::from_millis(10)),
        );
        for _ in 0..100 {
            assert!(scheduler.jitter() < Duration::from_millis(10));
        }
    }
}
