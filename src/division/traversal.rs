//! Unordered stream over every node of a frozen [`DivisionTree`]
//!
//! One producer task per level feeds a single bounded channel. The stream
//! ends once all six producers have finished and dropped their senders.

use super::{DivisionTree, Level, NodeId};
use std::sync::Arc;
use tokio::sync::mpsc;

const DEFAULT_BUFFER: usize = 1024;

/// Single-use stream of node ids
///
/// Create a fresh traversal for every retrieval cycle; a drained traversal
/// cannot be restarted.
pub struct Traversal {
    rx: mpsc::Receiver<NodeId>,
}

impl Traversal {
    /// Start producing all nodes of `tree`
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(tree: Arc<DivisionTree>) -> Self {
        Self::with_buffer(tree, DEFAULT_BUFFER)
    }

    pub fn with_buffer(tree: Arc<DivisionTree>, buffer: usize) -> Self {
        let (tx, rx) = mpsc::channel(buffer.max(1));

        for level in Level::ALL {
            let tree = Arc::clone(&tree);
            let tx = tx.clone();
            tokio::spawn(async move {
                let ids: Vec<NodeId> = tree.level_nodes(level).collect();
                for id in ids {
                    // receiver dropped: nobody is listening anymore
                    if tx.send(id).await.is_err() {
                        break;
                    }
                }
            });
        }

        Self { rx }
    }

    /// Next node, or `None` once every level has been produced
    pub async fn next(&mut self) -> Option<NodeId> {
        self.rx.recv().await
    }

    /// Drain the remaining nodes
    pub async fn collect(mut self) -> Vec<NodeId> {
        let mut ids = Vec::new();
        while let Some(id) = self.next().await {
            ids.push(id);
        }
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::division::{RawRecord, StaticDivisionSource, TreeLoader};
    use std::collections::HashSet;

    fn tree() -> Arc<DivisionTree> {
        let source = StaticDivisionSource::new()
            .with_level(Level::Country, vec![RawRecord::new("ES", "España", "")])
            .with_level(
                Level::Region,
                vec![
                    RawRecord::new("CA01", "Andalucía", "ES"),
                    RawRecord::new("CA02", "Aragón", "ES"),
                ],
            )
            .with_level(
                Level::Province,
                vec![
                    RawRecord::new("04", "Almería", "CA01"),
                    RawRecord::new("50", "Zaragoza", "CA02"),
                ],
            )
            .with_level(
                Level::Municipality,
                vec![
                    RawRecord::new("04013", "Almería", "04"),
                    RawRecord::new("50297", "Zaragoza", "50"),
                    RawRecord::new("00000", "Orphan", "77"),
                ],
            )
            .with_level(
                Level::District,
                (1..=12)
                    .map(|d| {
                        RawRecord::new(
                            format!("50297{:02}", d),
                            format!("Distrito {}", d),
                            "50297",
                        )
                    })
                    .collect(),
            );
        Arc::new(
            TreeLoader::new(source, "http://results.test/{path}/info.json")
                .load()
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_traversal_yields_every_node_once() {
        let tree = tree();
        let ids = Traversal::start(Arc::clone(&tree)).collect().await;

        assert_eq!(ids.len(), tree.len());
        let unique: HashSet<NodeId> = ids.iter().copied().collect();
        assert_eq!(unique.len(), ids.len());
        assert!(ids.iter().all(|&id| tree.get(id).id() != "00000"));
    }

    #[tokio::test]
    async fn test_traversal_is_repeatable() {
        let tree = tree();
        let first: HashSet<NodeId> = Traversal::start(Arc::clone(&tree))
            .collect()
            .await
            .into_iter()
            .collect();
        let second: HashSet<NodeId> = Traversal::with_buffer(Arc::clone(&tree), 1)
            .collect()
            .await
            .into_iter()
            .collect();

        assert_eq!(first, second);
        let expected: HashSet<NodeId> = tree.nodes().collect();
        assert_eq!(first, expected);
    }

    #[tokio::test]
    async fn test_dropping_traversal_stops_producers() {
        let tree = tree();
        let mut traversal = Traversal::with_buffer(Arc::clone(&tree), 1);
        assert!(traversal.next().await.is_some());
        drop(traversal);
    }
}
