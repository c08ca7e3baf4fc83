// SPDX-License-Identifier: Apache-2.0

use crate::{AppState, RemoteError, RetrieveError, ServiceError};
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use pacsproxy_model::{parse_uid, Uid};
use serde::Serialize;
use serde_json::json;
use std::sync::atomic::Ordering;
use tracing::warn;

#[derive(Debug, Clone, Serialize)]
pub(crate) struct ApiError {
    pub code: &'static str,
    pub message: String,
    pub request_id: String,
}

/// Which operation produced an error; remote failures map differently for
/// metadata lookups and payload retrievals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Surface {
    Metadata,
    Payload,
}

pub(crate) fn error_status(err: &ServiceError, surface: Surface) -> (StatusCode, &'static str) {
    match err {
        ServiceError::Validation(_) => (StatusCode::BAD_REQUEST, "invalid_identifier"),
        ServiceError::PayloadMissing(_) => (StatusCode::NOT_FOUND, "not_found"),
        ServiceError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "storage_error"),
        ServiceError::Retrieve(RetrieveError::LimiterClosed) => {
            (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
        }
        ServiceError::Retrieve(e) => match (surface, e) {
            (Surface::Metadata, RetrieveError::Remote(RemoteError::NotFound(_))) => {
                (StatusCode::NOT_FOUND, "not_found")
            }
            (Surface::Metadata, _) => (StatusCode::BAD_GATEWAY, "upstream_error"),
            (Surface::Payload, _) => (StatusCode::INTERNAL_SERVER_ERROR, "retrieval_failed"),
        },
    }
}

pub(crate) fn request_id(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string)
        .unwrap_or_else(|| "req-unknown".to_string())
}

pub(crate) fn api_error_response(status: StatusCode, err: ApiError) -> Response {
    let mut resp = (status, Json(json!({ "error": err }))).into_response();
    if status == StatusCode::SERVICE_UNAVAILABLE {
        resp.headers_mut()
            .insert("retry-after", HeaderValue::from_static("3"));
    }
    resp
}

fn service_error_response(err: &ServiceError, surface: Surface, headers: &HeaderMap) -> Response {
    let (status, code) = error_status(err, surface);
    if status.is_server_error() {
        warn!(status = status.as_u16(), code, error = %err, "request failed");
    }
    api_error_response(
        status,
        ApiError {
            code,
            message: err.to_string(),
            request_id: request_id(headers),
        },
    )
}

fn parse_path_uid(raw: &str) -> Result<Uid, ServiceError> {
    Ok(parse_uid(raw)?)
}

pub(crate) async fn landing_handler() -> impl IntoResponse {
    Json(json!({"hello": "world"}))
}

pub(crate) async fn healthz_handler() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

pub(crate) async fn readyz_handler(State(state): State<AppState>) -> impl IntoResponse {
    if state.ready.load(Ordering::Relaxed) && state.accepting_requests.load(Ordering::Relaxed) {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    }
}

pub(crate) async fn series_metadata_handler(
    State(state): State<AppState>,
    Path(series_uid): Path<String>,
    headers: HeaderMap,
) -> Response {
    let result = match parse_path_uid(&series_uid) {
        Ok(series) => state.service.series_metadata(&series).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(record) => Json(record).into_response(),
        Err(e) => service_error_response(&e, Surface::Metadata, &headers),
    }
}

pub(crate) async fn series_detail_handler(
    State(state): State<AppState>,
    Path(series_uid): Path<String>,
    headers: HeaderMap,
) -> Response {
    let result = match parse_path_uid(&series_uid) {
        Ok(series) => state.service.series_detail(&series).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(detail) => Json(detail).into_response(),
        Err(e) => service_error_response(&e, Surface::Metadata, &headers),
    }
}

pub(crate) async fn rois_handler(
    State(state): State<AppState>,
    Path(series_uid): Path<String>,
    headers: HeaderMap,
) -> Response {
    let result = match parse_path_uid(&series_uid) {
        Ok(series) => state.service.segmentations_of_series(&series).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(urls) => Json(urls).into_response(),
        Err(e) => service_error_response(&e, Surface::Metadata, &headers),
    }
}

pub(crate) async fn payload_handler(
    State(state): State<AppState>,
    Path((study_uid, series_uid, instance_uid)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> Response {
    let ids = parse_path_uid(&study_uid).and_then(|study| {
        Ok((
            study,
            parse_path_uid(&series_uid)?,
            parse_path_uid(&instance_uid)?,
        ))
    });
    let result = match ids {
        Ok((study, series, instance)) => {
            state
                .service
                .open_payload(&study, &series, &instance)
                .await
        }
        Err(e) => Err(e),
    };
    match result {
        Ok(bytes) => {
            let mut resp = Response::new(Body::from(bytes));
            resp.headers_mut().insert(
                "content-type",
                HeaderValue::from_static("application/dicom"),
            );
            resp
        }
        Err(e) => service_error_response(&e, Surface::Payload, &headers),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StoreError;
    use pacsproxy_model::ValidationError;

    #[test]
    fn status_mapping_per_surface() {
        let not_found: ServiceError = RemoteError::NotFound("series 1.2".to_string()).into();
        assert_eq!(
            error_status(&not_found, Surface::Metadata),
            (StatusCode::NOT_FOUND, "not_found")
        );
        assert_eq!(
            error_status(&not_found, Surface::Payload).0,
            StatusCode::INTERNAL_SERVER_ERROR
        );

        let transport: ServiceError = RemoteError::Transport("reset".to_string()).into();
        assert_eq!(
            error_status(&transport, Surface::Metadata).0,
            StatusCode::BAD_GATEWAY
        );

        let timeout = ServiceError::Retrieve(RetrieveError::Timeout(10));
        assert_eq!(
            error_status(&timeout, Surface::Payload),
            (StatusCode::INTERNAL_SERVER_ERROR, "retrieval_failed")
        );

        let invalid = ServiceError::Validation(ValidationError("bad".to_string()));
        assert_eq!(error_status(&invalid, Surface::Payload).0, StatusCode::BAD_REQUEST);

        let missing = ServiceError::PayloadMissing("1.2/1.3".to_string());
        assert_eq!(error_status(&missing, Surface::Payload).0, StatusCode::NOT_FOUND);

        let closed = ServiceError::Retrieve(RetrieveError::LimiterClosed);
        assert_eq!(
            error_status(&closed, Surface::Metadata).0,
            StatusCode::SERVICE_UNAVAILABLE
        );

        let store = ServiceError::Store(StoreError::Io {
            path: "x".to_string(),
            message: "denied".to_string(),
        });
        assert_eq!(
            error_status(&store, Surface::Payload).0,
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn request_id_falls_back_when_header_missing() {
        let mut headers = HeaderMap::new();
        assert_eq!(request_id(&headers), "req-unknown");
        headers.insert("x-request-id", HeaderValue::from_static("req-7"));
        assert_eq!(request_id(&headers), "req-7");
    }
}
