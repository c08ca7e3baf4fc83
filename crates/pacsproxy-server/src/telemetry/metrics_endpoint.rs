// SPDX-License-Identifier: Apache-2.0

use crate::AppState;
use axum::extract::State;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use std::fmt::Write as _;

const METRIC_VERSION: &str = env!("CARGO_PKG_VERSION");

fn labels(channel: &str) -> String {
    format!("{{channel=\"{channel}\",version=\"{METRIC_VERSION}\"}}")
}

pub(crate) fn render_metrics(state: &AppState) -> String {
    let service = &state.service;
    let labels = labels(service.channel_tag());
    let mut body = String::new();
    for (name, value) in service.metrics().snapshot() {
        let _ = writeln!(body, "# TYPE {name} counter");
        let _ = writeln!(body, "{name}{labels} {value}");
    }
    let gauges = [
        ("pacsproxy_limiter_in_use", service.limiter().in_use()),
        ("pacsproxy_limiter_capacity", service.limiter().capacity()),
        ("pacsproxy_inflight_retrievals", service.coordinator().in_flight()),
        ("pacsproxy_metadata_cache_entries", service.metadata_cache().len()),
    ];
    for (name, value) in gauges {
        let _ = writeln!(body, "# TYPE {name} gauge");
        let _ = writeln!(body, "{name}{labels} {value}");
    }
    body
}

pub(crate) async fn metrics_handler(State(state): State<AppState>) -> Response {
    let mut resp = (StatusCode::OK, render_metrics(&state)).into_response();
    resp.headers_mut().insert(
        "content-type",
        HeaderValue::from_static("text/plain; version=0.0.4"),
    );
    resp
}
