//! Periodic cycle driver

use super::{CycleReport, RetrievalScheduler};
use anyhow::{anyhow, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinError, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Runs a retrieval cycle at startup and then on every interval tick
///
/// Each cycle is an independent task with a child of the shutdown token, so a
/// slow cycle never delays the next tick and cycles may overlap.
pub struct Harvester {
    scheduler: Arc<RetrievalScheduler>,
    interval: Duration,
}

impl Harvester {
    pub fn new(scheduler: Arc<RetrievalScheduler>, interval: Duration) -> Result<Self> {
        if interval.is_zero() {
            return Err(anyhow!("Cycle interval must be greater than zero"));
        }
        Ok(Self {
            scheduler,
            interval,
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Harvest until `shutdown` is cancelled, then wait for running cycles
    ///
    /// Returns the number of cycles that finished.
    pub async fn run(&self, shutdown: CancellationToken) -> u64 {
        info!(
            "Harvesting {} nodes every {}",
            self.scheduler.tree().len(),
            humantime::format_duration(self.interval)
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut cycles: JoinSet<CycleReport> = JoinSet::new();
        let mut finished = 0u64;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let scheduler = Arc::clone(&self.scheduler);
                    let cancel = shutdown.child_token();
                    cycles.spawn(async move { scheduler.run_cycle(cancel).await });
                }
                Some(joined) = cycles.join_next(), if !cycles.is_empty() => {
                    finished += log_cycle(joined);
                }
            }
        }

        if !cycles.is_empty() {
            info!("Shutting down, waiting for {} running cycles", cycles.len());
        }
        while let Some(joined) = cycles.join_next().await {
            finished += log_cycle(joined);
        }

        info!("Harvester stopped after {} cycles", finished);
        finished
    }
}

fn log_cycle(joined: Result<CycleReport, JoinError>) -> u64 {
    match joined {
        Ok(report) => {
            if report.failures() > 0 {
                info!(
                    "Cycle {} left {} nodes without a new snapshot",
                    report.cycle,
                    report.failures()
                );
            }
            1
        }
        Err(e) => {
            error!("Retrieval cycle task failed: {}", e);
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{MemorySnapshotStore, SnapshotStore};
    use crate::division::{Level, RawRecord, StaticDivisionSource, TreeLoader};
    use crate::retrieval::{Fetcher, SchedulerConfig};

    struct EchoFetcher;

    impl Fetcher for EchoFetcher {
        fn fetch(&self, url: &str) -> Result<Vec<u8>> {
            Ok(url.as_bytes().to_vec())
        }
    }

    fn scheduler(store: Arc<MemorySnapshotStore>, max_jitter: Duration) -> Arc<RetrievalScheduler> {
        let source = StaticDivisionSource::new()
            .with_level(Level::Country, vec![RawRecord::new("ES", "España", "")])
            .with_level(Level::Region, vec![RawRecord::new("CA02", "Aragón", "ES")])
            .with_level(Level::Province, vec![RawRecord::new("50", "Zaragoza", "CA02")]);
        let tree = TreeLoader::new(source, "http://results.test/{path}")
            .load()
            .unwrap();

        Arc::new(RetrievalScheduler::new(
            Arc::new(tree),
            Arc::new(EchoFetcher),
            store,
            SchedulerConfig::default().with_max_jitter(max_jitter),
        ))
    }

    #[test]
    fn test_zero_interval_rejected() {
        let store = Arc::new(MemorySnapshotStore::new());
        assert!(Harvester::new(scheduler(store, Duration::ZERO), Duration::ZERO).is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_first_cycle_runs_immediately() {
        let store = Arc::new(MemorySnapshotStore::new());
        let harvester =
            Harvester::new(scheduler(store.clone(), Duration::ZERO), Duration::from_secs(3600))
                .unwrap();

        let shutdown = CancellationToken::new();
        let handle = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { harvester.run(shutdown).await })
        };

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while store.partitions().unwrap().len() < 3 {
            assert!(tokio::time::Instant::now() < deadline, "first cycle never stored");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        shutdown.cancel();
        let finished = handle.await.unwrap();
        assert_eq!(finished, 1);
        assert_eq!(
            store
                .get("ES/CA02/50", crate::database::SnapshotSelector::Latest)
                .unwrap()
                .unwrap()
                .payload,
            b"http://results.test/ES/CA02/50"
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_shutdown_drains_running_cycle() {
        let store = Arc::new(MemorySnapshotStore::new());
        let harvester = Harvester::new(
            scheduler(store.clone(), Duration::from_secs(3600)),
            Duration::from_secs(3600),
        )
        .unwrap();

        let shutdown = CancellationToken::new();
        let handle = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { harvester.run(shutdown).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();

        let finished = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(finished, 1);
        assert!(store.partitions().unwrap().is_empty());
    }
}
