use axum::extract::multipart::Field;
use axum::extract::{Multipart, Path, State};
use axum::Json;
use bytes::Bytes;
use futures::channel::mpsc;
use futures::SinkExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::nullable;
use crate::api::response::{ApiError, AppJson, AppQuery, JSend, Page, Pagination};
use crate::engine::{ChildKind, EraseOptions, FileUpload, FolderLoad, UrlOverrides};
use crate::hashing::Source;
use crate::storage::models::{FileRecord, FileType, FileUpdate, Patch};
use crate::AppState;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct FileResponse {
    pub byte_size: u64,
    pub created_at: String,
    pub description: Option<String>,
    pub downloads: u64,
    pub file_type: FileType,
    pub folder_id: Option<String>,
    pub hash: String,
    pub id: String,
    pub mime_type: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub references: u64,
    pub source_url: Option<String>,
    pub updated_at: String,
}

#[derive(Debug, Deserialize)]
pub struct ImportFileRequest {
    pub url: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub folder_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateFileRequest {
    #[serde(default, deserialize_with = "nullable")]
    pub description: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub folder_id: Option<Option<String>>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListFilesParams {
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
    #[serde(default)]
    pub file_type: Option<FileType>,
    #[serde(default)]
    pub folder_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteFileParams {
    #[serde(default)]
    pub force: bool,
}

fn default_limit() -> u32 {
    20
}

/// Text parts that describe the `file` part. They must arrive before it.
#[derive(Debug, Default)]
struct UploadFields {
    name: Option<String>,
    description: Option<String>,
    folder_id: Option<String>,
}

// ============================================================================
// Handlers
// ============================================================================

/// Streaming multipart upload. The `file` part is hashed and written to the
/// backend as it arrives, never buffered whole.
pub async fn create_file(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<JSend<FileResponse>>, ApiError> {
    let mut fields = UploadFields::default();
    let mut stored: Option<FileRecord> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Invalid multipart data: {e}")))?
    {
        let field_name = field.name().unwrap_or("").to_string();

        match field_name.as_str() {
            "file" => {
                if stored.is_some() {
                    return Err(ApiError::bad_request("only one file part is allowed"));
                }

                let name = fields
                    .name
                    .take()
                    .or_else(|| field.file_name().map(|s| s.to_string()))
                    .ok_or_else(|| ApiError::bad_request("name field is required"))?;

                let (tx, rx) = mpsc::channel::<Result<Bytes, std::io::Error>>(4);
                let upload = FileUpload {
                    name,
                    mime_type: field.content_type().map(|s| s.to_string()),
                    size: None,
                    source: Source::from_stream(rx),
                    parent_id: fields.folder_id.take(),
                    description: fields.description.take(),
                    source_url: None,
                };

                let (pumped, result) = tokio::join!(
                    pump_field(field, tx, state.config.max_upload_size),
                    state.storage.upload(upload)
                );
                pumped?;
                stored = Some(result?);
            }
            "name" => fields.name = Some(text_field(field, "name").await?),
            "description" => fields.description = Some(text_field(field, "description").await?),
            "folder_id" => fields.folder_id = Some(text_field(field, "folder_id").await?),
            _ => {
                // Ignore unknown fields
            }
        }
    }

    let file = stored.ok_or_else(|| ApiError::bad_request("file field is required"))?;
    let path = state.storage.file_path(&file)?;

    tracing::debug!(file_id = %file.id, references = file.references, "Uploaded file");
    Ok(JSend::success(file_to_response(&file, Some(path))))
}

/// Store a file fetched from a remote URL.
pub async fn import_file(
    State(state): State<Arc<AppState>>,
    AppJson(req): AppJson<ImportFileRequest>,
) -> Result<Json<JSend<FileResponse>>, ApiError> {
    if req.url.trim().is_empty() {
        return Err(ApiError::bad_request("url must not be empty"));
    }

    let overrides = UrlOverrides {
        name: req.name,
        mime_type: None,
        parent_id: req.folder_id,
        description: req.description,
    };
    let file = state.storage.upload_from_url(req.url.trim(), overrides).await?;
    let path = state.storage.file_path(&file)?;

    Ok(JSend::success(file_to_response(&file, Some(path))))
}

pub async fn get_file(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JSend<FileResponse>>, ApiError> {
    let file = state.storage.resolve_file(Some(&id))?;
    let path = state.storage.file_path(&file)?;

    Ok(JSend::success(file_to_response(&file, Some(path))))
}

/// Rename, move or describe a file.
pub async fn update_file(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    AppJson(req): AppJson<UpdateFileRequest>,
) -> Result<Json<JSend<FileResponse>>, ApiError> {
    let update = FileUpdate {
        name: req.name,
        description: Patch::from(req.description),
        parent_id: Patch::from(req.folder_id),
    };

    let file = state.storage.update_file(&id, update)?;
    let path = state.storage.file_path(&file)?;

    tracing::debug!(file_id = %id, "Updated file");
    Ok(JSend::success(file_to_response(&file, Some(path))))
}

/// Release one reference, or remove the file outright with `?force=true`.
pub async fn delete_file(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    AppQuery(params): AppQuery<DeleteFileParams>,
) -> Result<Json<JSend<()>>, ApiError> {
    let file = state.storage.resolve_file(Some(&id))?;

    state
        .storage
        .erase(&file, EraseOptions { force: params.force })
        .await?;

    Ok(JSend::success(()))
}

pub async fn list_files(
    State(state): State<Arc<AppState>>,
    AppQuery(params): AppQuery<ListFilesParams>,
) -> Result<Json<JSend<Page<FileResponse>>>, ApiError> {
    if params.limit == 0 {
        return Err(ApiError::bad_request("limit must be greater than 0"));
    }

    let mut files = match params.folder_id.as_deref() {
        Some(folder_id) => state
            .storage
            .resolve_folder(
                Some(folder_id),
                FolderLoad {
                    children: Some(ChildKind::Files),
                    ancestors: false,
                },
            )?
            .files
            .unwrap_or_default(),
        None => state.storage.db().get_all_files()?,
    };

    if let Some(file_type) = params.file_type {
        files.retain(|f| f.file_type == file_type);
    }
    files.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    let total = files.len() as u64;
    let items: Vec<FileResponse> = files
        .iter()
        .skip(params.offset as usize)
        .take(params.limit as usize)
        .map(|f| file_to_response(f, None))
        .collect();

    Ok(JSend::success(Page {
        items,
        pagination: Pagination {
            limit: params.limit,
            offset: params.offset,
            total,
        },
    }))
}

// ============================================================================
// Helpers
// ============================================================================

/// Forward a multipart field into the upload channel, enforcing the size cap.
/// A read failure or an oversized body is also sent down the channel so the
/// upload fails and discards what it wrote.
async fn pump_field(
    mut field: Field<'_>,
    mut tx: mpsc::Sender<Result<Bytes, std::io::Error>>,
    max_size: u64,
) -> Result<(), ApiError> {
    let mut total = 0u64;
    loop {
        match field.chunk().await {
            Ok(Some(chunk)) => {
                total += chunk.len() as u64;
                if total > max_size {
                    let _ = tx
                        .send(Err(std::io::Error::new(
                            std::io::ErrorKind::InvalidData,
                            "upload exceeds maximum size",
                        )))
                        .await;
                    return Err(ApiError::payload_too_large(format!(
                        "File exceeds maximum upload size of {max_size} bytes"
                    )));
                }
                if tx.send(Ok(chunk)).await.is_err() {
                    // Upload gave up; its own error is reported.
                    return Ok(());
                }
            }
            Ok(None) => return Ok(()),
            Err(e) => {
                let _ = tx
                    .send(Err(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        e.to_string(),
                    )))
                    .await;
                return Err(ApiError::bad_request(format!("Failed to read file: {e}")));
            }
        }
    }
}

async fn text_field(field: Field<'_>, name: &str) -> Result<String, ApiError> {
    field
        .text()
        .await
        .map_err(|e| ApiError::bad_request(format!("Invalid {name}: {e}")))
}

pub(crate) fn file_to_response(file: &FileRecord, path: Option<String>) -> FileResponse {
    FileResponse {
        byte_size: file.byte_size,
        created_at: file.created_at.to_rfc3339(),
        description: file.description.clone(),
        downloads: file.downloads,
        file_type: file.file_type,
        folder_id: file.parent_id.clone(),
        hash: file.hash.clone(),
        id: file.id.clone(),
        mime_type: file.mime_type.clone(),
        name: file.name.clone(),
        path,
        references: file.references,
        source_url: file.source_url.clone(),
        updated_at: file.updated_at.to_rfc3339(),
    }
}
