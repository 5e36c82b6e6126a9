//! Shared handler plumbing: state, errors and blocking store access

use crate::config::DEFAULT_READBACK_PATH;
use crate::database::SnapshotStore;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;

pub const DEFAULT_BACKUP_NAME: &str = "escrutinio.sqlite3";

// =============================================================================
// State
// =============================================================================

/// Shared server state
#[derive(Clone)]
pub struct ServerState {
    /// Store every endpoint reads from
    pub store: Arc<dyn SnapshotStore>,

    /// Path served by `/testread`
    pub readback_path: Arc<str>,

    /// File name offered by `/dbbackup`
    pub backup_name: Arc<str>,
}

impl ServerState {
    pub fn new(store: Arc<dyn SnapshotStore>) -> Self {
        Self {
            store,
            readback_path: Arc::from(DEFAULT_READBACK_PATH),
            backup_name: Arc::from(DEFAULT_BACKUP_NAME),
        }
    }

    pub fn with_readback_path(mut self, path: impl AsRef<str>) -> Self {
        self.readback_path = Arc::from(path.as_ref());
        self
    }

    pub fn with_backup_name(mut self, name: impl AsRef<str>) -> Self {
        self.backup_name = Arc::from(name.as_ref());
        self
    }

    /// Run a store operation on the blocking thread pool
    pub async fn with_store<T, F>(&self, op: F) -> Result<T, ApiError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn SnapshotStore) -> anyhow::Result<T> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || op(store.as_ref()))
            .await
            .map_err(|e| ApiError::internal(format!("Store task failed: {}", e)))?
            .map_err(ApiError::from)
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Error returned by a handler, rendered as a plain-text response
#[derive(Debug, Clone)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.status, self.message)
    }
}

impl std::error::Error for ApiError {}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal(format!("{:#}", err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!("Request failed: {}", self.message);
        }
        (self.status, self.message).into_response()
    }
}
