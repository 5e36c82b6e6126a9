//! Consistent SQLite image of the store, served as a download

use crate::database::ObservedAt;
use crate::server::handler::{ApiError, ServerState};
use axum::body::Body;
use axum::extract::State;
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE};
use axum::response::Response;
use std::path::{Path, PathBuf};
use tokio_util::io::ReaderStream;
use tracing::{info, warn};

pub async fn backup_handler(State(state): State<ServerState>) -> Result<Response, ApiError> {
    let dest = backup_path();
    let image = dest.clone();
    let copied = state.with_store(move |store| store.backup_into(&image)).await;
    let copied = match copied {
        Ok(copied) => copied,
        Err(e) => {
            remove_image(&dest).await;
            return Err(e);
        }
    };

    let file = tokio::fs::File::open(&dest)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to open backup image: {}", e)))?;
    let length = file
        .metadata()
        .await
        .map_err(|e| ApiError::internal(format!("Failed to read backup image size: {}", e)))?
        .len();

    // the open handle keeps the unlinked image readable while streaming
    remove_image(&dest).await;
    info!("Serving backup with {} snapshots ({} bytes)", copied, length);

    Response::builder()
        .header(CONTENT_TYPE, "application/octet-stream")
        .header(
            CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", state.backup_name),
        )
        .header(CONTENT_LENGTH, length)
        .body(Body::from_stream(ReaderStream::new(file)))
        .map_err(|e| ApiError::internal(format!("Failed to build backup response: {}", e)))
}

fn backup_path() -> PathBuf {
    std::env::temp_dir().join(format!(
        "escrutinio-backup-{}-{}.sqlite3",
        std::process::id(),
        ObservedAt::now().unix_nanos()
    ))
}

async fn remove_image(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove backup image {}: {}", path.display(), e);
        }
    }
}
