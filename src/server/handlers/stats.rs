//! Partition statistics

use crate::database::PartitionStats;
use crate::server::handler::{ApiError, ServerState};
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use std::fmt::Write;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatsQuery {
    /// `json` for a JSON list, anything else for plain text
    pub format: Option<String>,
}

pub async fn stats_handler(
    State(state): State<ServerState>,
    Query(query): Query<StatsQuery>,
) -> Result<Response, ApiError> {
    let partitions = state.with_store(|store| store.partitions()).await?;

    match query.format.as_deref() {
        Some("json") => Ok(Json(partitions).into_response()),
        _ => Ok(render_stats_text(&partitions).into_response()),
    }
}

/// `BucketCount: N` followed by one `Bucket <path> -> <count>` line per partition
pub fn render_stats_text(partitions: &[PartitionStats]) -> String {
    let mut text = format!("BucketCount: {}\n", partitions.len());
    for partition in partitions {
        let _ = writeln!(
            text,
            "Bucket {} -> {}",
            partition.path, partition.snapshot_count
        );
    }
    text
}
