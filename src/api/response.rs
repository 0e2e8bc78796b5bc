//! JSend envelopes and the handler error type.
//!
//! Successes carry `{"status": "success", "data": ...}`. Client errors are
//! `fail` with the message under `data`, server errors are `error` with a
//! top-level message.

use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, FromRequestParts, Request};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;

use crate::engine::StorageError;
use crate::storage::DatabaseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JSendStatus {
    Success,
    Fail,
    Error,
}

#[derive(Debug, Serialize)]
pub struct JSend<T: Serialize> {
    pub status: JSendStatus,
    pub data: T,
}

impl<T: Serialize> JSend<T> {
    pub fn success(data: T) -> Json<JSend<T>> {
        Json(JSend {
            status: JSendStatus::Success,
            data,
        })
    }
}

/// One page of a listing with its position in the whole.
#[derive(Debug, Serialize)]
pub struct Page<T: Serialize> {
    pub items: Vec<T>,
    pub pagination: Pagination,
}

#[derive(Debug, Serialize)]
pub struct Pagination {
    pub limit: u32,
    pub offset: u32,
    pub total: u64,
}

/// A handler failure. 4xx codes render as `fail`, 5xx as `error`.
#[derive(Debug)]
pub struct ApiError {
    code: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn payload_too_large(message: impl Into<String>) -> Self {
        Self::new(StatusCode::PAYLOAD_TOO_LARGE, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn code(&self) -> StatusCode {
        self.code
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = if self.code.is_server_error() {
            json!({ "status": JSendStatus::Error, "message": self.message })
        } else {
            json!({ "status": JSendStatus::Fail, "data": { "message": self.message } })
        };
        (self.code, Json(body)).into_response()
    }
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        let code = match &e {
            StorageError::FileNotFound(_) => return Self::not_found("File not found"),
            StorageError::FolderNotFound(_) => return Self::not_found("Folder not found"),
            StorageError::ObjectNotFound(_) => return Self::not_found("File content not found"),
            StorageError::BackendUnavailable(reason) => {
                tracing::error!(reason = %reason, "Storage backend unavailable");
                return Self::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Storage backend is unavailable",
                );
            }
            StorageError::MissingFileId
            | StorageError::InvalidInput(_)
            | StorageError::RemoteFetchFailed(_) => StatusCode::BAD_REQUEST,
            StorageError::NameTaken(_) | StorageError::InvalidMove(_) => StatusCode::CONFLICT,
            StorageError::InvalidRange(_) => StatusCode::RANGE_NOT_SATISFIABLE,
            StorageError::TransferFailed(_) => StatusCode::BAD_GATEWAY,
            _ => {
                tracing::error!(error = %e, "Request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self::new(code, e.to_string())
    }
}

impl From<DatabaseError> for ApiError {
    fn from(e: DatabaseError) -> Self {
        StorageError::from(e).into()
    }
}

/// `axum::Json` that rejects with a JSend `fail`.
pub struct AppJson<T>(pub T);

#[axum::async_trait]
impl<S, T> FromRequest<S> for AppJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, ApiError> {
        let rejection = match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => return Ok(AppJson(value)),
            Err(rejection) => rejection,
        };
        let message = match rejection {
            JsonRejection::JsonDataError(err) => {
                format!("Invalid request body: {}", err.body_text())
            }
            JsonRejection::JsonSyntaxError(_) => "Malformed JSON in request body".into(),
            JsonRejection::MissingJsonContentType(_) => {
                "Missing Content-Type: application/json header".into()
            }
            _ => "Failed to read request body".into(),
        };
        Err(ApiError::bad_request(message))
    }
}

/// Query string extractor on `serde_qs`, rejecting with a JSend `fail`.
pub struct AppQuery<T>(pub T);

#[axum::async_trait]
impl<S, T> FromRequestParts<S> for AppQuery<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> Result<Self, ApiError> {
        serde_qs::from_str(parts.uri.query().unwrap_or_default())
            .map(AppQuery)
            .map_err(|e| {
                let detail = e
                    .to_string()
                    .replace("u32", "non-negative integer")
                    .replace("u64", "non-negative integer");
                ApiError::bad_request(format!("Invalid query parameter: {detail}"))
            })
    }
}
