use axum::http::Request;
use std::{cell::RefCell, fmt, future::Future};
use tower_http::{
    classify::{SharedClassifier, StatusInRangeAsFailures},
    trace::{DefaultOnFailure, DefaultOnRequest, DefaultOnResponse, MakeSpan, TraceLayer},
};
use uuid::Uuid;

pub use tracing::{debug, error, info, trace, warn};

/**
 * Request correlation for logs and error bodies.
 *
 * Every inbound request gets a [`RequestId`] (taken from `x-request-id` or generated).
 * The id lives in a task-local for the duration of the handler so that error responses
 * and log lines can pick it up without threading it through every call.
 */

/// Request ID tracking information
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestId(pub String);

impl Default for RequestId {
    fn default() -> Self {
        RequestId(Uuid::new_v4().to_string())
    }
}

impl RequestId {
    pub fn new(value: impl Into<String>) -> Self {
        RequestId(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

tokio::task_local! {
    static CURRENT_REQUEST_ID: RefCell<Option<RequestId>>;
}

pub async fn scope_request_id<Fut, R>(request_id: RequestId, future: Fut) -> R
where
    Fut: Future<Output = R>,
{
    CURRENT_REQUEST_ID
        .scope(RefCell::new(Some(request_id)), future)
        .await
}

pub fn current_request_id() -> Option<RequestId> {
    CURRENT_REQUEST_ID
        .try_with(|cell| cell.borrow().clone())
        .ok()
        .flatten()
}

#[derive(Clone, Default)]
pub struct RequestSpanMaker;

impl<B> MakeSpan<B> for RequestSpanMaker {
    fn make_span(&mut self, request: &Request<B>) -> tracing::Span {
        let request_id = request
            .extensions()
            .get::<RequestId>()
            .cloned()
            .or_else(|| {
                request
                    .headers()
                    .get("x-request-id")
                    .and_then(|v| v.to_str().ok())
                    .map(RequestId::new)
            })
            .unwrap_or_default();

        tracing::info_span!(
            "http.request",
            request_id = %request_id.as_str(),
            method = %request.method(),
            uri = %request.uri().path(),
        )
    }
}

/// Configure tracing for the application with tower-http
pub fn configure_http_tracing() -> TraceLayer<
    SharedClassifier<StatusInRangeAsFailures>,
    RequestSpanMaker,
    DefaultOnRequest,
    DefaultOnResponse,
    (),
    (),
    DefaultOnFailure,
> {
    let classifier = SharedClassifier::new(StatusInRangeAsFailures::new(500..=599));
    TraceLayer::new(classifier)
        .make_span_with(RequestSpanMaker)
        .on_request(DefaultOnRequest::default())
        .on_response(DefaultOnResponse::default())
        .on_body_chunk(())
        .on_eos(())
        .on_failure(DefaultOnFailure::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn request_id_is_visible_inside_scope_only() {
        assert!(current_request_id().is_none());

        let seen = scope_request_id(RequestId::new("req-7"), async { current_request_id() }).await;
        assert_eq!(seen, Some(RequestId::new("req-7")));

        assert!(current_request_id().is_none());
    }

    #[test]
    fn generated_request_ids_are_distinct() {
        assert_ne!(RequestId::default(), RequestId::default());
    }
}
