use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use dashmap::{mapref::entry::Entry, DashMap};
use http_body_util::BodyExt as _;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";
pub const IDEMPOTENT_REPLAY_HEADER: &str = "idempotent-replayed";
const DEFAULT_TTL: Duration = Duration::from_secs(600);
const MAX_KEY_LEN: usize = 255;

#[derive(Clone)]
pub struct StoredResponse {
    pub status: StatusCode,
    pub body: Bytes,
    pub content_type: Option<HeaderValue>,
    pub stored_at: Instant,
}

#[derive(Clone)]
enum Slot {
    InFlight(Instant),
    Done(StoredResponse),
}

impl Slot {
    fn started_at(&self) -> Instant {
        match self {
            Slot::InFlight(at) => *at,
            Slot::Done(stored) => stored.stored_at,
        }
    }
}

enum Claim {
    Acquired,
    InFlight,
    Replay(StoredResponse),
}

/// Responses of mutating requests keyed by `Idempotency-Key`, replayed for repeats
/// within the TTL.
#[derive(Clone)]
pub struct IdempotencyStore {
    entries: Arc<DashMap<String, Slot>>,
    ttl: Duration,
}

impl Default for IdempotencyStore {
    fn default() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }
}

impl IdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            ttl,
        }
    }

    pub fn get(&self, key: &str) -> Option<StoredResponse> {
        match self.entries.get(key).as_deref() {
            Some(Slot::Done(stored)) if stored.stored_at.elapsed() < self.ttl => {
                Some(stored.clone())
            }
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn cleanup(&self) {
        let ttl = self.ttl;
        self.entries.retain(|_, slot| slot.started_at().elapsed() < ttl);
    }

    fn claim(&self, key: &str) -> Claim {
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().started_at().elapsed() >= self.ttl {
                    occupied.insert(Slot::InFlight(Instant::now()));
                    return Claim::Acquired;
                }
                match occupied.get() {
                    Slot::InFlight(_) => Claim::InFlight,
                    Slot::Done(stored) => Claim::Replay(stored.clone()),
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Slot::InFlight(Instant::now()));
                Claim::Acquired
            }
        }
    }

    fn complete(&self, key: &str, stored: StoredResponse) {
        self.entries.insert(key.to_string(), Slot::Done(stored));
    }

    fn release(&self, key: &str) {
        self.entries.remove(key);
    }
}

fn replay(stored: StoredResponse) -> Response {
    let mut resp = Response::new(Body::from(stored.body));
    *resp.status_mut() = stored.status;
    if let Some(ct) = stored.content_type {
        resp.headers_mut()
            .insert(HeaderName::from_static("content-type"), ct);
    }
    resp.headers_mut().insert(
        HeaderName::from_static(IDEMPOTENT_REPLAY_HEADER),
        HeaderValue::from_static("true"),
    );
    resp
}

/// For mutating requests carrying an `Idempotency-Key`, runs the handler once and
/// replays its response for repeats. Server errors are not stored so the caller can
/// retry them; a repeat that arrives while the first request is running gets 409.
pub async fn idempotency_middleware(
    State(store): State<IdempotencyStore>,
    req: Request,
    next: Next,
) -> Response {
    let is_mutating = matches!(req.method().as_str(), "POST" | "PUT" | "PATCH" | "DELETE");
    if !is_mutating {
        return next.run(req).await;
    }

    let Some(raw_key) = req
        .headers()
        .get(IDEMPOTENCY_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
    else {
        return next.run(req).await;
    };

    if raw_key.len() > MAX_KEY_LEN {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "success": false,
                "error": "Idempotency-Key is too long",
            })),
        )
            .into_response();
    }

    // Keys are scoped to the route so one key cannot replay another endpoint.
    let key = format!("{} {}:{}", req.method(), req.uri().path(), raw_key);
    store.cleanup();

    match store.claim(&key) {
        Claim::Replay(stored) => {
            debug!(status = stored.status.as_u16(), "replaying idempotent response");
            return replay(stored);
        }
        Claim::InFlight => {
            return (
                StatusCode::CONFLICT,
                Json(json!({
                    "success": false,
                    "error": "A request with this Idempotency-Key is still being processed",
                })),
            )
                .into_response();
        }
        Claim::Acquired => {}
    }

    let resp = next.run(req).await;
    if resp.status().is_server_error() {
        store.release(&key);
        return resp;
    }

    let (parts, body) = resp.into_parts();
    match body.collect().await {
        Ok(collected) => {
            let bytes = collected.to_bytes();
            store.complete(
                &key,
                StoredResponse {
                    status: parts.status,
                    body: bytes.clone(),
                    content_type: parts.headers.get("content-type").cloned(),
                    stored_at: Instant::now(),
                },
            );
            Response::from_parts(parts, Body::from(bytes))
        }
        Err(err) => {
            warn!(error = %err, "failed to buffer response for idempotency store");
            store.release(&key);
            (StatusCode::INTERNAL_SERVER_ERROR, Body::empty()).into_response()
        }
    }
}
