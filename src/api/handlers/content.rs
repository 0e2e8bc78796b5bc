use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use std::sync::Arc;

use crate::api::range::{parse_range, ByteSpan};
use crate::api::response::ApiError;
use crate::engine::DownloadOptions;
use crate::AppState;

/// Serve file content, honoring single `Range` requests.
/// Route: GET /files/:id/content
pub async fn serve_content(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let file = state.storage.resolve_file(Some(&id))?;

    let span = match headers.get(header::RANGE).and_then(|v| v.to_str().ok()) {
        Some(value) => match parse_range(value, file.byte_size) {
            Ok(span) => span,
            Err(_) => return Ok(unsatisfiable(file.byte_size)),
        },
        None => None,
    };

    let options = match span {
        Some(ByteSpan { offset, length }) => DownloadOptions::range(offset, Some(length)),
        None => DownloadOptions::default(),
    };
    let download = state.storage.download(&file, options).await?;

    let status = if span.is_some() {
        StatusCode::PARTIAL_CONTENT
    } else {
        StatusCode::OK
    };
    let size = download.size();
    let mut response = (status, Body::from_stream(download.into_stream())).into_response();
    let headers = response.headers_mut();

    headers.insert(
        header::CONTENT_TYPE,
        file.mime_type
            .parse()
            .unwrap_or(HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(size));
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));

    if let Some(span) = span {
        if let Ok(value) = span.content_range(file.byte_size).parse() {
            headers.insert(header::CONTENT_RANGE, value);
        }
    }

    if let Ok(value) = format!("inline; filename=\"{}\"", file.name.replace('"', "")).parse() {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }

    // Content never changes under an id; only metadata does.
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("public, max-age=3600"),
    );

    Ok(response)
}

fn unsatisfiable(total: u64) -> Response {
    let mut response = ApiError::new(
        StatusCode::RANGE_NOT_SATISFIABLE,
        "Requested range is not satisfiable",
    )
    .into_response();
    if let Ok(value) = format!("bytes */{total}").parse() {
        response.headers_mut().insert(header::CONTENT_RANGE, value);
    }
    response
}
