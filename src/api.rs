//! REST client for the Clarotec backend.
//!
//! Provides base-URL normalisation, query building, the error taxonomy, and
//! the session interceptor: a 401 on a not-yet-retried request triggers one
//! token refresh and one resubmission with the new bearer header; a second
//! 401 (or a failed refresh) invalidates the session. The transport sits
//! behind a small trait so the interceptor logic is covered by tests with a
//! scripted fake instead of a live server.

use reqwest::Method;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tauri::Emitter;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{session::SessionState, storage};

/// Default timeout for API requests (30 seconds).
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Token refresh endpoint. The refresh credential travels in the body.
const REFRESH_PATH: &str = "/api/auth/refresh";

/// Throttle for `session_expired` emissions: a burst of parallel 401s must
/// not spam the frontend with navigation events.
const SESSION_EXPIRED_THROTTLE_MS: u64 = 2_000;
static SESSION_EXPIRED_LAST_EMIT_MS: AtomicU64 = AtomicU64::new(0);

// ---------------------------------------------------------------------------
// URL normalisation
// ---------------------------------------------------------------------------

/// Normalise the backend base URL:
/// - strip trailing slashes
/// - strip a trailing `/api` segment
/// - ensure a scheme is present (https, or http for localhost)
pub fn normalize_base_url(url: &str) -> String {
    let mut url = url.trim().to_string();

    // Ensure scheme
    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    // Strip trailing slashes
    while url.ends_with('/') {
        url.pop();
    }

    // Strip trailing /api
    if url.ends_with("/api") {
        url.truncate(url.len() - 4);
    }

    while url.ends_with('/') {
        url.pop();
    }

    url
}

/// Only relative `/api/*` paths are accepted from the webview.
pub fn validate_api_path(path: &str) -> Result<(), String> {
    if path.trim().is_empty() {
        return Err("Missing API path".into());
    }
    if path.contains("..") {
        return Err("Invalid API path".into());
    }
    if path.starts_with("http://") || path.starts_with("https://") {
        return Err("Absolute URLs are not allowed".into());
    }
    if !path.starts_with("/api/") {
        return Err("Only /api/* paths are allowed".into());
    }
    Ok(())
}

/// Append query parameters from a JSON object, skipping null/empty values.
pub fn build_query(path: &str, options: Option<&Value>) -> String {
    fn enc(s: &str) -> String {
        s.replace('%', "%25")
            .replace('&', "%26")
            .replace('=', "%3D")
            .replace(' ', "%20")
            .replace('+', "%2B")
            .replace('?', "%3F")
            .replace('#', "%23")
    }
    let mut query: Vec<(String, String)> = Vec::new();
    if let Some(Value::Object(map)) = options {
        for (k, v) in map {
            if v.is_null() {
                continue;
            }
            let sval = match v {
                Value::String(s) => s.clone(),
                Value::Bool(b) => b.to_string(),
                Value::Number(n) => n.to_string(),
                _ => v.to_string(),
            };
            if !sval.is_empty() {
                query.push((k.clone(), sval));
            }
        }
    }
    if query.is_empty() {
        return path.to_string();
    }
    let mut out = String::from(path);
    out.push('?');
    out.push_str(
        &query
            .iter()
            .map(|(k, v)| format!("{}={}", enc(k), enc(v)))
            .collect::<Vec<String>>()
            .join("&"),
    );
    out
}

// ---------------------------------------------------------------------------
// Error taxonomy
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Cannot reach the Clarotec backend at {0}")]
    Unreachable(String),
    #[error("Connection to {0} timed out")]
    Timeout(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Session expired or not authorized")]
    Unauthorized,
    #[error("{message}")]
    Business { status: u16, message: String },
    #[error("Invalid JSON from the backend: {0}")]
    Decode(String),
    #[error("Request cancelled")]
    Cancelled,
}

/// Fallback message for an HTTP status when the server sent no usable body.
fn status_error(status: u16) -> String {
    match status {
        401 => "Session expired or not authorized".to_string(),
        403 => "Not allowed for this account".to_string(),
        404 => "Backend endpoint not found".to_string(),
        s if s >= 500 => format!("Backend server error (HTTP {s})"),
        s => format!("Unexpected response from the backend (HTTP {s})"),
    }
}

// ---------------------------------------------------------------------------
// Transport seam
// ---------------------------------------------------------------------------

/// An outbound request as seen by the transport.
#[derive(Debug, Clone)]
pub(crate) struct ApiRequest {
    pub method: String,
    pub path: String,
    pub body: Option<Value>,
    pub bearer: Option<String>,
}

/// A response with its raw body text; JSON parsing is deferred so business
/// error extraction can fall back to plain text.
#[derive(Debug, Clone)]
pub(crate) struct ApiResponse {
    pub status: u16,
    pub text: String,
}

impl ApiResponse {
    pub fn json(&self) -> Result<Value, ApiError> {
        if self.text.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&self.text).map_err(|e| ApiError::Decode(e.to_string()))
    }

    /// Server-reported business message, or a status fallback.
    fn business_message(&self) -> String {
        if let Ok(json) = self.json() {
            let msg = json
                .get("error")
                .or_else(|| json.get("message"))
                .or_else(|| json.get("detail"))
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty());
            if let Some(msg) = msg {
                return msg.to_string();
            }
        }
        status_error(self.status)
    }
}

pub(crate) trait Transport {
    async fn execute(&self, req: &ApiRequest) -> Result<ApiResponse, ApiError>;
}

/// Real transport: reqwest against the configured base URL, every request
/// racing the shared cancellation token so logout/shutdown abort in-flight
/// calls instead of letting them touch defunct state.
pub struct ApiState {
    http: reqwest::Client,
    base_url: Mutex<Option<String>>,
    cancel: Mutex<CancellationToken>,
}

impl ApiState {
    pub fn new(base_url: Option<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: Mutex::new(base_url.map(|u| normalize_base_url(&u))),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn base_url(&self) -> Option<String> {
        self.base_url.lock().ok().and_then(|g| g.clone())
    }

    pub fn set_base_url(&self, url: &str) -> String {
        let normalized = normalize_base_url(url);
        if let Ok(mut guard) = self.base_url.lock() {
            *guard = Some(normalized.clone());
        }
        normalized
    }

    /// Cancel every in-flight request and arm a fresh token for the next one.
    pub fn cancel_in_flight(&self) {
        if let Ok(mut guard) = self.cancel.lock() {
            guard.cancel();
            *guard = CancellationToken::new();
        }
    }

    fn cancel_token(&self) -> CancellationToken {
        self.cancel
            .lock()
            .map(|g| g.clone())
            .unwrap_or_else(|_| CancellationToken::new())
    }
}

impl Transport for ApiState {
    async fn execute(&self, req: &ApiRequest) -> Result<ApiResponse, ApiError> {
        let base = self
            .base_url()
            .ok_or_else(|| ApiError::Network("Backend URL is not configured".into()))?;
        let full_url = format!("{base}{}", req.path);

        let method: Method = req
            .method
            .to_uppercase()
            .parse()
            .map_err(|_| ApiError::Network(format!("Invalid HTTP method: {}", req.method)))?;

        let mut builder = self
            .http
            .request(method, &full_url)
            .header("Content-Type", "application/json");
        if let Some(bearer) = &req.bearer {
            builder = builder.header("Authorization", format!("Bearer {bearer}"));
        }
        if let Some(body) = &req.body {
            builder = builder.json(body);
        }

        let cancel = self.cancel_token();
        let resp = tokio::select! {
            _ = cancel.cancelled() => return Err(ApiError::Cancelled),
            resp = builder.send() => resp.map_err(|e| friendly_error(&base, &e))?,
        };

        let status = resp.status().as_u16();
        let text = tokio::select! {
            _ = cancel.cancelled() => return Err(ApiError::Cancelled),
            text = resp.text() => text.unwrap_or_default(),
        };

        Ok(ApiResponse { status, text })
    }
}

/// Convert a `reqwest::Error` into a taxonomy entry with a readable message.
fn friendly_error(url: &str, err: &reqwest::Error) -> ApiError {
    if err.is_connect() {
        return ApiError::Unreachable(url.to_string());
    }
    if err.is_timeout() {
        return ApiError::Timeout(url.to_string());
    }
    if err.is_builder() {
        return ApiError::Network(format!("Invalid backend URL: {url}"));
    }
    ApiError::Network(format!("{err}"))
}

// ---------------------------------------------------------------------------
// Session interceptor
// ---------------------------------------------------------------------------

/// In-memory bearer/refresh pair used while sending.
#[derive(Debug, Clone)]
pub(crate) struct TokenPair {
    pub access: String,
    pub refresh: Option<String>,
}

/// Result of an authenticated send: the final response plus whether the
/// access token was rotated along the way (so the caller persists it).
#[derive(Debug)]
pub(crate) struct SendResult {
    pub response: ApiResponse,
    pub rotated: bool,
}

/// Send an authenticated request, refreshing the access token at most once.
///
/// On a 401: POST the refresh credential, replace the bearer header with the
/// fresh access token, and resubmit the original request exactly once. A 401
/// on the resubmission, a missing refresh credential, or a failed refresh
/// call all surface as `ApiError::Unauthorized` without further retries.
pub(crate) async fn send_with_refresh<T: Transport>(
    transport: &T,
    tokens: &mut TokenPair,
    mut req: ApiRequest,
) -> Result<SendResult, ApiError> {
    req.bearer = Some(tokens.access.clone());
    let first = transport.execute(&req).await?;
    if first.status != 401 {
        return Ok(SendResult {
            response: first,
            rotated: false,
        });
    }

    let refresh = tokens.refresh.clone().ok_or(ApiError::Unauthorized)?;

    let refresh_req = ApiRequest {
        method: "POST".into(),
        path: REFRESH_PATH.into(),
        body: Some(serde_json::json!({ "refresh_token": refresh })),
        bearer: None,
    };
    let refresh_resp = transport.execute(&refresh_req).await?;
    if !(200..300).contains(&refresh_resp.status) {
        return Err(ApiError::Unauthorized);
    }
    let refresh_body = refresh_resp.json()?;
    let new_access = refresh_body
        .get("access_token")
        .or_else(|| refresh_body.get("accessToken"))
        .or_else(|| refresh_body.get("token"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or(ApiError::Unauthorized)?;

    info!("access token refreshed after 401, resubmitting request once");
    tokens.access = new_access.clone();
    req.bearer = Some(new_access);

    let second = transport.execute(&req).await?;
    if second.status == 401 {
        // Retry flag: the refreshed request is never refreshed again.
        return Err(ApiError::Unauthorized);
    }
    Ok(SendResult {
        response: second,
        rotated: true,
    })
}

/// Classify a terminal response into `Ok(body)` or a taxonomy error.
pub(crate) fn classify(response: ApiResponse) -> Result<Value, ApiError> {
    match response.status {
        s if (200..300).contains(&s) => response.json(),
        401 => Err(ApiError::Unauthorized),
        s => Err(ApiError::Business {
            status: s,
            message: response.business_message(),
        }),
    }
}

// ---------------------------------------------------------------------------
// High-level entry points used by commands
// ---------------------------------------------------------------------------

/// Unauthenticated request (public request flow, tracking lookup, login).
pub async fn public_fetch(
    api: &ApiState,
    path: &str,
    method: &str,
    body: Option<Value>,
) -> Result<Value, ApiError> {
    let req = ApiRequest {
        method: method.to_string(),
        path: path.to_string(),
        body,
        bearer: None,
    };
    classify(api.execute(&req).await?)
}

/// Authenticated request with the one-shot refresh interceptor.
///
/// Rotated access tokens are persisted to the keyring and mirrored into the
/// session store. An unrecoverable 401 clears the stored credentials, resets
/// the session, and emits a throttled `session_expired` event so the
/// frontend navigates to the login entry point.
pub async fn authed_fetch(
    app: &tauri::AppHandle,
    api: &ApiState,
    session: &SessionState,
    path: &str,
    method: &str,
    body: Option<Value>,
) -> Result<Value, ApiError> {
    validate_api_path(path).map_err(ApiError::Network)?;

    let mut tokens = session
        .token_pair()
        .ok_or(ApiError::Unauthorized)
        .or_else(|_| {
            // Session not yet hydrated (e.g. command raced the bootstrap):
            // fall back to the persisted pair.
            storage::load_tokens()
                .map(|saved| TokenPair {
                    access: saved.access.to_string(),
                    refresh: saved.refresh.as_deref().map(|s| s.to_string()),
                })
                .ok_or(ApiError::Unauthorized)
        })
        .map_err(|_| {
            warn!(path, "authenticated request without a stored session");
            ApiError::Unauthorized
        })?;

    let req = ApiRequest {
        method: method.to_string(),
        path: path.to_string(),
        body,
        bearer: None,
    };

    let sent = send_with_refresh(api, &mut tokens, req).await;

    match sent {
        Ok(result) => {
            if result.rotated {
                session.set_access_token(&tokens.access);
                if let Err(e) = storage::save_tokens(&tokens.access, None) {
                    warn!(error = %e, "failed to persist rotated access token");
                }
            }
            match classify(result.response) {
                Err(ApiError::Unauthorized) => {
                    handle_session_expired(app, session, path);
                    Err(ApiError::Unauthorized)
                }
                other => other,
            }
        }
        Err(ApiError::Unauthorized) => {
            handle_session_expired(app, session, path);
            Err(ApiError::Unauthorized)
        }
        Err(e) => Err(e),
    }
}

/// Unrecoverable auth failure: clear credentials, reset the session, and
/// tell the frontend to navigate to login (throttled).
pub fn handle_session_expired(app: &tauri::AppHandle, session: &SessionState, source: &str) {
    warn!(source, "session expired, clearing credentials");
    storage::clear_tokens();
    session.force_anonymous();

    let now_ms = chrono::Utc::now().timestamp_millis().max(0) as u64;
    if should_emit_session_expired(now_ms) {
        let _ = app.emit(
            "session_expired",
            serde_json::json!({ "source": source }),
        );
    }
}

/// Rate-limit gate for `session_expired` events. Process-global.
pub(crate) fn should_emit_session_expired(now_ms: u64) -> bool {
    let last = SESSION_EXPIRED_LAST_EMIT_MS.load(Ordering::Relaxed);
    if now_ms.saturating_sub(last) < SESSION_EXPIRED_THROTTLE_MS {
        return false;
    }
    SESSION_EXPIRED_LAST_EMIT_MS
        .compare_exchange(last, now_ms, Ordering::SeqCst, Ordering::Relaxed)
        .is_ok()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serial_test::serial;
    use std::collections::VecDeque;

    // -- scripted transport -------------------------------------------------

    pub(crate) struct FakeTransport {
        responses: Mutex<VecDeque<Result<ApiResponse, ApiError>>>,
        pub log: Mutex<Vec<ApiRequest>>,
    }

    impl FakeTransport {
        pub fn scripted(responses: Vec<Result<ApiResponse, ApiError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                log: Mutex::new(Vec::new()),
            }
        }

        pub fn requests(&self) -> Vec<ApiRequest> {
            self.log.lock().unwrap().clone()
        }
    }

    impl Transport for FakeTransport {
        async fn execute(&self, req: &ApiRequest) -> Result<ApiResponse, ApiError> {
            self.log.lock().unwrap().push(req.clone());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .expect("fake transport ran out of scripted responses")
        }
    }

    pub(crate) fn ok(body: &str) -> Result<ApiResponse, ApiError> {
        Ok(ApiResponse {
            status: 200,
            text: body.to_string(),
        })
    }

    pub(crate) fn status(status: u16, body: &str) -> Result<ApiResponse, ApiError> {
        Ok(ApiResponse {
            status,
            text: body.to_string(),
        })
    }

    fn tokens() -> TokenPair {
        TokenPair {
            access: "expired-access".into(),
            refresh: Some("refresh-1".into()),
        }
    }

    fn get(path: &str) -> ApiRequest {
        ApiRequest {
            method: "GET".into(),
            path: path.into(),
            body: None,
            bearer: None,
        }
    }

    // -- URL / query helpers ------------------------------------------------

    #[test]
    fn normalize_base_url_variants() {
        assert_eq!(
            normalize_base_url("api.clarotec.cl/"),
            "https://api.clarotec.cl"
        );
        assert_eq!(
            normalize_base_url("https://api.clarotec.cl/api/"),
            "https://api.clarotec.cl"
        );
        assert_eq!(
            normalize_base_url("localhost:8000"),
            "http://localhost:8000"
        );
    }

    #[test]
    fn validate_api_path_rejects_escapes() {
        assert!(validate_api_path("/api/pedidos/7").is_ok());
        assert!(validate_api_path("").is_err());
        assert!(validate_api_path("/api/../admin").is_err());
        assert!(validate_api_path("https://evil.example/api/x").is_err());
        assert!(validate_api_path("/pedidos").is_err());
    }

    #[test]
    fn build_query_skips_empty_and_encodes() {
        let q = build_query(
            "/api/pedidos",
            Some(&serde_json::json!({
                "estado": "cotizado",
                "buscar": "bomba 3/4",
                "vacio": "",
                "nulo": null,
                "pagina": 2,
            })),
        );
        assert!(q.starts_with("/api/pedidos?"));
        assert!(q.contains("estado=cotizado"));
        assert!(q.contains("buscar=bomba%203/4"));
        assert!(q.contains("pagina=2"));
        assert!(!q.contains("vacio"));
        assert!(!q.contains("nulo"));
    }

    // -- interceptor --------------------------------------------------------

    #[tokio::test]
    async fn happy_path_attaches_bearer_and_does_not_rotate() {
        let transport = FakeTransport::scripted(vec![ok(r#"{"id":1}"#)]);
        let mut pair = tokens();
        let result = send_with_refresh(&transport, &mut pair, get("/api/pedidos/1"))
            .await
            .unwrap();
        assert!(!result.rotated);
        let reqs = transport.requests();
        assert_eq!(reqs.len(), 1);
        assert_eq!(reqs[0].bearer.as_deref(), Some("expired-access"));
    }

    #[tokio::test]
    async fn a_401_triggers_one_refresh_and_one_retry_with_new_bearer() {
        let transport = FakeTransport::scripted(vec![
            status(401, ""),
            ok(r#"{"access_token":"fresh-access"}"#),
            ok(r#"{"id":1}"#),
        ]);
        let mut pair = tokens();
        let result = send_with_refresh(&transport, &mut pair, get("/api/pedidos/1"))
            .await
            .unwrap();
        assert!(result.rotated);
        assert_eq!(pair.access, "fresh-access");

        let reqs = transport.requests();
        assert_eq!(reqs.len(), 3);
        assert_eq!(reqs[1].path, REFRESH_PATH);
        assert_eq!(reqs[1].bearer, None);
        assert_eq!(reqs[2].path, "/api/pedidos/1");
        assert_eq!(reqs[2].bearer.as_deref(), Some("fresh-access"));
    }

    #[tokio::test]
    async fn a_second_401_does_not_trigger_a_second_refresh() {
        let transport = FakeTransport::scripted(vec![
            status(401, ""),
            ok(r#"{"access_token":"fresh-access"}"#),
            status(401, ""),
        ]);
        let mut pair = tokens();
        let err = send_with_refresh(&transport, &mut pair, get("/api/pedidos/1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized));
        // first attempt + refresh + retry, and nothing more
        assert_eq!(transport.requests().len(), 3);
    }

    #[tokio::test]
    async fn failed_refresh_surfaces_unauthorized_without_retry() {
        let transport =
            FakeTransport::scripted(vec![status(401, ""), status(403, r#"{"error":"revoked"}"#)]);
        let mut pair = tokens();
        let err = send_with_refresh(&transport, &mut pair, get("/api/perfil"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized));
        assert_eq!(transport.requests().len(), 2);
    }

    #[tokio::test]
    async fn missing_refresh_token_short_circuits() {
        let transport = FakeTransport::scripted(vec![status(401, "")]);
        let mut pair = TokenPair {
            access: "expired".into(),
            refresh: None,
        };
        let err = send_with_refresh(&transport, &mut pair, get("/api/perfil"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized));
        assert_eq!(transport.requests().len(), 1);
    }

    #[test]
    fn classify_prefers_server_business_message() {
        let err = classify(ApiResponse {
            status: 422,
            text: r#"{"error":"Debe seleccionar un método de envío"}"#.into(),
        })
        .unwrap_err();
        match err {
            ApiError::Business { status, message } => {
                assert_eq!(status, 422);
                assert_eq!(message, "Debe seleccionar un método de envío");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn classify_falls_back_to_status_message() {
        let err = classify(ApiResponse {
            status: 500,
            text: "<html>oops</html>".into(),
        })
        .unwrap_err();
        match err {
            ApiError::Business { message, .. } => assert!(message.contains("HTTP 500")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    // -- emission throttle (process-global state) ---------------------------

    #[test]
    #[serial]
    fn session_expired_emission_is_throttled() {
        SESSION_EXPIRED_LAST_EMIT_MS.store(0, Ordering::SeqCst);
        assert!(should_emit_session_expired(10_000));
        assert!(!should_emit_session_expired(10_500));
        assert!(should_emit_session_expired(13_000));
    }

    #[test]
    #[serial]
    fn session_expired_throttle_ignores_clock_rewind() {
        SESSION_EXPIRED_LAST_EMIT_MS.store(0, Ordering::SeqCst);
        assert!(should_emit_session_expired(50_000));
        assert!(!should_emit_session_expired(49_000));
    }
}
