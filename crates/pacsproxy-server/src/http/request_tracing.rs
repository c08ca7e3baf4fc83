// SPDX-License-Identifier: Apache-2.0

use crate::AppState;
use axum::http::HeaderMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RequestTrace {
    pub request_id: String,
    pub correlation_id: Option<String>,
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToString::to_string)
}

/// Propagates `x-request-id` when the caller sent one, otherwise allocates
/// the next `req-<hex>` id.
#[must_use]
pub(crate) fn extract_request_trace(headers: &HeaderMap, state: &AppState) -> RequestTrace {
    let request_id = header_value(headers, "x-request-id").unwrap_or_else(|| {
        let id = state
            .request_id_seed
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        format!("req-{id:016x}")
    });
    RequestTrace {
        request_id,
        correlation_id: header_value(headers, "x-correlation-id"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::fake_state;
    use axum::http::HeaderValue;

    #[test]
    fn propagates_caller_ids() {
        let mut headers = HeaderMap::new();
        headers.insert("x-request-id", HeaderValue::from_static(" req-abc "));
        headers.insert("x-correlation-id", HeaderValue::from_static("corr-1"));
        let (state, _tmp) = fake_state();
        let trace = extract_request_trace(&headers, &state);
        assert_eq!(trace.request_id, "req-abc");
        assert_eq!(trace.correlation_id.as_deref(), Some("corr-1"));
    }

    #[test]
    fn generates_sequential_ids() {
        let (state, _tmp) = fake_state();
        let a = extract_request_trace(&HeaderMap::new(), &state);
        let b = extract_request_trace(&HeaderMap::new(), &state);
        assert_eq!(a.request_id, "req-0000000000000001");
        assert_eq!(b.request_id, "req-0000000000000002");
        assert_eq!(a.correlation_id, None);
    }
}
