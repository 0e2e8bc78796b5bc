use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::handlers;
use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    let upload_limit = state.config.max_upload_size as usize;

    Router::new()
        // Files
        .route(
            "/files",
            get(handlers::list_files)
                .post(handlers::create_file)
                // Headroom for the multipart framing and text fields.
                .layer(DefaultBodyLimit::max(upload_limit.saturating_add(64 * 1024))),
        )
        .route("/files/import", post(handlers::import_file))
        .route(
            "/files/:id",
            get(handlers::get_file)
                .put(handlers::update_file)
                .delete(handlers::delete_file),
        )
        .route("/files/:id/content", get(handlers::serve_content))
        .route("/files/:id/owners", get(handlers::list_file_owners))
        .route(
            "/files/:id/owners/:user_id",
            put(handlers::grant_file_owner).delete(handlers::revoke_file_owner),
        )
        // Folders
        .route("/folders", post(handlers::create_folder))
        .route("/folders/root", get(handlers::get_root_folder))
        .route(
            "/folders/:id",
            get(handlers::get_folder)
                .put(handlers::update_folder)
                .delete(handlers::delete_folder),
        )
        .route("/folders/:id/owners", get(handlers::list_folder_owners))
        .route(
            "/folders/:id/owners/:user_id",
            put(handlers::grant_folder_owner)
                .delete(handlers::revoke_folder_owner),
        )
        // Maintenance
        .route("/admin/purge", post(handlers::admin_purge))
        .route("/_internal/health", get(handlers::health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
