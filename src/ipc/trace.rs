use tracing::Span;
use uuid::Uuid;

use super::types::Request;

/// Ensures the request carries a correlation id, generating one when the
/// caller's middleware did not supply it. Resolved once per request so
/// every log line and audit row of the same attempt shares the id.
pub fn with_correlation(mut req: Request) -> Request {
    let supplied = req
        .correlation_id
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    req.correlation_id = Some(supplied.unwrap_or_else(|| Uuid::new_v4().to_string()));
    req
}

pub fn request_span(req: &Request) -> Span {
    tracing::info_span!(
        "ipc.request",
        method = %req.method,
        correlation_id = %req.correlation(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(correlation: Option<&str>) -> Request {
        Request {
            id: "1".into(),
            method: "health".into(),
            params: serde_json::Value::Null,
            correlation_id: correlation.map(|s| s.to_string()),
        }
    }

    #[test]
    fn supplied_correlation_id_passes_through_unchanged() {
        let req = with_correlation(request(Some("req-abc-123")));
        assert_eq!(req.correlation(), "req-abc-123");
    }

    #[test]
    fn missing_or_blank_correlation_id_is_generated() {
        let generated = with_correlation(request(None));
        assert!(!generated.correlation().is_empty());

        let blank = with_correlation(request(Some("   ")));
        assert!(!blank.correlation().trim().is_empty());
    }
}
