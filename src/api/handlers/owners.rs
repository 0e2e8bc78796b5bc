use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::api::response::{ApiError, AppJson, JSend};
use crate::storage::models::{OwnerRecord, Permission};
use crate::AppState;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct OwnerResponse {
    pub created_at: String,
    pub node_id: String,
    pub permission: Permission,
    pub user_id: String,
}

#[derive(Debug, Deserialize)]
pub struct GrantRequest {
    pub permission: Permission,
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn list_file_owners(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JSend<Vec<OwnerResponse>>>, ApiError> {
    let db = state.storage.db();
    db.get_file(&id)?
        .ok_or_else(|| ApiError::not_found("File not found"))?;

    let owners = db.file_owners(&id)?;
    Ok(JSend::success(owners.iter().map(owner_to_response).collect()))
}

/// Share a file with a user, or change their permission.
pub async fn grant_file_owner(
    State(state): State<Arc<AppState>>,
    Path((id, user_id)): Path<(String, String)>,
    AppJson(req): AppJson<GrantRequest>,
) -> Result<Json<JSend<OwnerResponse>>, ApiError> {
    let owner = state.storage.db().grant_file_owner(&id, &user_id, req.permission)?;

    tracing::debug!(file_id = %id, user_id = %user_id, permission = ?req.permission, "Granted file access");
    Ok(JSend::success(owner_to_response(&owner)))
}

pub async fn revoke_file_owner(
    State(state): State<Arc<AppState>>,
    Path((id, user_id)): Path<(String, String)>,
) -> Result<Json<JSend<()>>, ApiError> {
    let revoked = state.storage.db().revoke_file_owner(&id, &user_id)?;
    if !revoked {
        return Err(ApiError::not_found("Owner not found"));
    }
    Ok(JSend::success(()))
}

pub async fn list_folder_owners(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JSend<Vec<OwnerResponse>>>, ApiError> {
    let db = state.storage.db();
    db.get_folder(&id)?
        .ok_or_else(|| ApiError::not_found("Folder not found"))?;

    let owners = db.folder_owners(&id)?;
    Ok(JSend::success(owners.iter().map(owner_to_response).collect()))
}

/// Share a folder with a user, or change their permission.
pub async fn grant_folder_owner(
    State(state): State<Arc<AppState>>,
    Path((id, user_id)): Path<(String, String)>,
    AppJson(req): AppJson<GrantRequest>,
) -> Result<Json<JSend<OwnerResponse>>, ApiError> {
    let owner = state.storage.db().grant_folder_owner(&id, &user_id, req.permission)?;

    tracing::debug!(folder_id = %id, user_id = %user_id, permission = ?req.permission, "Granted folder access");
    Ok(JSend::success(owner_to_response(&owner)))
}

pub async fn revoke_folder_owner(
    State(state): State<Arc<AppState>>,
    Path((id, user_id)): Path<(String, String)>,
) -> Result<Json<JSend<()>>, ApiError> {
    let revoked = state.storage.db().revoke_folder_owner(&id, &user_id)?;
    if !revoked {
        return Err(ApiError::not_found("Owner not found"));
    }
    Ok(JSend::success(()))
}

// ============================================================================
// Helpers
// ============================================================================

fn owner_to_response(owner: &OwnerRecord) -> OwnerResponse {
    OwnerResponse {
        created_at: owner.created_at.to_rfc3339(),
        node_id: owner.node_id.clone(),
        permission: owner.permission,
        user_id: owner.user_id.clone(),
    }
}
