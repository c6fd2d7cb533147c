//! HTTP API.

mod download;
mod files;
mod health;
mod upload;

use axum::{
    routing::{get, post},
    Router,
};

pub(crate) fn get_router() -> Router {
    Router::new()
        .route("/files", post(upload::upload_file).get(files::list_files))
        .route(
            "/files/:file_id",
            get(download::download_file).delete(files::delete_file),
        )
        .route("/files/:file_id/metadata", get(files::file_metadata))
        .route("/health", get(health::health_check))
}
