//! Read-back of the latest stored document of a path

use crate::database::SnapshotSelector;
use crate::server::handler::{ApiError, ServerState};
use axum::extract::{Path, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::HeaderValue;
use axum::response::{IntoResponse, Response};

/// Header carrying the observation instant of the returned snapshot
pub const OBSERVED_AT_HEADER: &str = "x-observed-at";

/// Latest payload of the configured read-back path
pub async fn testread_handler(State(state): State<ServerState>) -> Result<Response, ApiError> {
    let path = state.readback_path.to_string();
    latest_response(&state, path).await
}

/// Latest payload of any path, e.g. `/latest/ES/CA02/50`
pub async fn latest_handler(
    State(state): State<ServerState>,
    Path(path): Path<String>,
) -> Result<Response, ApiError> {
    latest_response(&state, path.trim_matches('/').to_string()).await
}

async fn latest_response(state: &ServerState, path: String) -> Result<Response, ApiError> {
    let lookup = path.clone();
    let snapshot = state
        .with_store(move |store| store.get(&lookup, SnapshotSelector::Latest))
        .await?
        .ok_or_else(|| ApiError::not_found(format!("No snapshot stored for '{}'", path)))?;

    let mut response = snapshot.payload.into_response();
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if let Ok(value) = HeaderValue::from_str(&snapshot.observed_at.to_string()) {
        headers.insert(OBSERVED_AT_HEADER, value);
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{MemorySnapshotStore, ObservedAt, SnapshotStore};
    use axum::http::StatusCode;
    use std::sync::Arc;

    fn state() -> ServerState {
        let store = MemorySnapshotStore::new();
        store
            .put("ES/CA02/50/50297/5029710", ObservedAt::from_unix_nanos(1), b"{\"v\":1}")
            .unwrap();
        store
            .put("ES/CA02/50/50297/5029710", ObservedAt::from_unix_nanos(2), b"{\"v\":2}")
            .unwrap();
        ServerState::new(Arc::new(store))
    }

    #[tokio::test]
    async fn test_testread_returns_latest() {
        let response = testread_handler(State(state())).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[OBSERVED_AT_HEADER],
            "1970-01-01T00:00:00.000000002Z"
        );

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"{\"v\":2}");
    }

    #[tokio::test]
    async fn test_testread_missing_path() {
        let state = state().with_readback_path("ES/CA99");
        let err = testread_handler(State(state)).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_latest_by_path() {
        let response = latest_handler(
            State(state()),
            Path("ES/CA02/50/50297/5029710/".to_string()),
        )
        .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let err = latest_handler(State(state()), Path("ES".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }
}
