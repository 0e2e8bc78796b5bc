use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::files::{file_to_response, FileResponse};
use super::nullable;
use crate::api::response::{ApiError, AppJson, AppQuery, JSend};
use crate::engine::{ChildKind, FolderDeletion, FolderLoad, FolderView, NewFolder};
use crate::storage::models::{FolderRecord, FolderUpdate, Patch};
use crate::AppState;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct FolderResponse {
    pub created_at: String,
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<FileResponse>>,
    pub folder_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folders: Option<Vec<FolderSummary>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hierarchy: Option<Vec<FolderSummary>>,
    pub id: String,
    pub is_root: bool,
    pub name: String,
    pub path: String,
    pub size: u64,
    pub updated_at: String,
}

#[derive(Debug, Serialize)]
pub struct FolderSummary {
    pub folder_id: Option<String>,
    pub id: String,
    pub name: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct FolderParams {
    #[serde(default)]
    pub ancestors: bool,
    #[serde(default)]
    pub children: Option<ChildKind>,
}

#[derive(Debug, Deserialize)]
pub struct CreateFolderRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub folder_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateFolderRequest {
    #[serde(default, deserialize_with = "nullable")]
    pub description: Option<Option<String>>,
    #[serde(default)]
    pub folder_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn get_root_folder(
    State(state): State<Arc<AppState>>,
    AppQuery(params): AppQuery<FolderParams>,
) -> Result<Json<JSend<FolderResponse>>, ApiError> {
    folder_response(&state, None, params).map(JSend::success)
}

pub async fn get_folder(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    AppQuery(params): AppQuery<FolderParams>,
) -> Result<Json<JSend<FolderResponse>>, ApiError> {
    folder_response(&state, Some(&id), params).map(JSend::success)
}

pub async fn create_folder(
    State(state): State<Arc<AppState>>,
    AppJson(req): AppJson<CreateFolderRequest>,
) -> Result<Json<JSend<FolderResponse>>, ApiError> {
    let folder = state
        .storage
        .create_folder(NewFolder {
            name: req.name,
            parent_id: req.folder_id,
            description: req.description,
        })?;

    folder_response(&state, Some(&folder.id), FolderParams::default()).map(JSend::success)
}

pub async fn update_folder(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    AppJson(req): AppJson<UpdateFolderRequest>,
) -> Result<Json<JSend<FolderResponse>>, ApiError> {
    let update = FolderUpdate {
        name: req.name,
        description: Patch::from(req.description),
        parent_id: req.folder_id,
    };
    state
        .storage
        .update_folder(&id, update)?;

    tracing::debug!(folder_id = %id, "Updated folder");
    folder_response(&state, Some(&id), FolderParams::default()).map(JSend::success)
}

/// Delete a folder and everything inside it.
pub async fn delete_folder(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JSend<FolderDeletion>>, ApiError> {
    let deletion = state.storage.delete_folder(&id).await?;

    Ok(JSend::success(deletion))
}

// ============================================================================
// Helpers
// ============================================================================

fn folder_response(
    state: &AppState,
    id: Option<&str>,
    params: FolderParams,
) -> Result<FolderResponse, ApiError> {
    let view = state
        .storage
        .resolve_folder(
            id,
            FolderLoad {
                children: params.children,
                ancestors: params.ancestors,
            },
        )?;
    let size = state.storage.folder_size(&view.folder.id)?;

    Ok(view_to_response(view, size))
}

fn view_to_response(view: FolderView, size: u64) -> FolderResponse {
    let FolderView {
        folder,
        path,
        files,
        folders,
        hierarchy,
    } = view;

    FolderResponse {
        created_at: folder.created_at.to_rfc3339(),
        description: folder.description,
        files: files.map(|files| files.iter().map(|f| file_to_response(f, None)).collect()),
        folder_id: folder.parent_id,
        folders: folders.map(|folders| folders.iter().map(summary).collect()),
        hierarchy: hierarchy.map(|chain| chain.iter().map(summary).collect()),
        id: folder.id,
        is_root: folder.is_root,
        name: folder.name,
        path,
        size,
        updated_at: folder.updated_at.to_rfc3339(),
    }
}

fn summary(folder: &FolderRecord) -> FolderSummary {
    FolderSummary {
        folder_id: folder.parent_id.clone(),
        id: folder.id.clone(),
        name: folder.name.clone(),
    }
}
