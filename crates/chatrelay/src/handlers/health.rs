//! Liveness and build metadata.

use axum::Json;
use axum::http::StatusCode;

use crate::api::VersionResponse;
use crate::build_info;

pub async fn livez() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

pub async fn version() -> Json<VersionResponse> {
    Json(VersionResponse {
        name: build_info::NAME.to_string(),
        version: build_info::VERSION.to_string(),
    })
}
