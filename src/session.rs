//! Auth session store.
//!
//! Holds the bearer/refresh pair and the authenticated user profile. The
//! lifecycle is `bootstrapping → {authenticated, anonymous}` and
//! `authenticated → anonymous` on logout. While bootstrapping the snapshot
//! reports `loading: true` so the frontend renders a blocking placeholder
//! instead of flashing protected routes.
//!
//! The store itself is an injectable struct registered as Tauri managed
//! state; the transition logic is written against the transport seam so the
//! whole state machine is unit-testable without a server or a keyring.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use std::sync::Mutex;
use tracing::{debug, info, warn};
use zeroize::Zeroize;

use crate::api::{self, ApiError, ApiRequest, Transport};

const LOGIN_PATH: &str = "/api/auth/login";
const PROFILE_PATH: &str = "/api/auth/perfil";
const REGISTER_PATH: &str = "/api/auth/registro";

pub(crate) use crate::api::TokenPair;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Bootstrapping,
    Authenticated,
    Anonymous,
}

struct SessionInner {
    phase: Phase,
    perfil: Option<Value>,
    tokens: Option<TokenPair>,
}

/// Tauri managed state for the auth session.
pub struct SessionState {
    inner: Mutex<SessionInner>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(SessionInner {
                phase: Phase::Bootstrapping,
                perfil: None,
                tokens: None,
            }),
        }
    }

    /// JSON snapshot in the shape the frontend session hook expects.
    pub fn snapshot(&self) -> Value {
        let inner = self.inner.lock().unwrap();
        serde_json::json!({
            "loading": inner.phase == Phase::Bootstrapping,
            "authenticated": inner.phase == Phase::Authenticated,
            "usuario": inner.perfil.clone().unwrap_or(Value::Null),
        })
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.lock().unwrap().phase == Phase::Authenticated
    }

    pub(crate) fn token_pair(&self) -> Option<TokenPair> {
        self.inner.lock().unwrap().tokens.clone()
    }

    pub(crate) fn set_access_token(&self, access: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(tokens) = inner.tokens.as_mut() {
            tokens.access.zeroize();
            tokens.access = access.to_string();
        }
    }

    pub(crate) fn set_authenticated(&self, perfil: Value, tokens: TokenPair) {
        let mut inner = self.inner.lock().unwrap();
        inner.phase = Phase::Authenticated;
        inner.perfil = Some(perfil);
        inner.tokens = Some(tokens);
    }

    pub(crate) fn update_perfil(&self, perfil: Value) {
        let mut inner = self.inner.lock().unwrap();
        if inner.phase == Phase::Authenticated {
            inner.perfil = Some(perfil);
        }
    }

    /// Reset to anonymous, wiping token material in place.
    pub fn force_anonymous(&self) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(tokens) = inner.tokens.as_mut() {
            tokens.access.zeroize();
            if let Some(refresh) = tokens.refresh.as_mut() {
                refresh.zeroize();
            }
        }
        inner.phase = Phase::Anonymous;
        inner.perfil = None;
        inner.tokens = None;
    }
}

// ---------------------------------------------------------------------------
// Transition logic (pure over the transport seam)
// ---------------------------------------------------------------------------

/// Result of the startup bootstrap.
pub(crate) enum BootstrapOutcome {
    Authenticated {
        perfil: Value,
        tokens: TokenPair,
        rotated: bool,
    },
    /// `discard_tokens` is true when a persisted token was present but the
    /// profile fetch rejected it.
    Anonymous { discard_tokens: bool },
}

/// Exchange a persisted token pair for a profile. Any failure (expired
/// token, failed refresh, network error) lands in anonymous; a session is
/// never half-initialised.
pub(crate) async fn bootstrap_session<T: Transport>(
    transport: &T,
    saved: Option<TokenPair>,
) -> BootstrapOutcome {
    let Some(mut tokens) = saved else {
        return BootstrapOutcome::Anonymous {
            discard_tokens: false,
        };
    };

    if let Some(exp) = token_expiry(&tokens.access) {
        if exp <= Utc::now() {
            debug!(expired_at = %exp, "persisted access token is expired, relying on refresh");
        }
    }

    let req = ApiRequest {
        method: "GET".into(),
        path: PROFILE_PATH.into(),
        body: None,
        bearer: None,
    };
    match api::send_with_refresh(transport, &mut tokens, req).await {
        Ok(sent) => {
            let rotated = sent.rotated;
            match api::classify(sent.response) {
                Ok(perfil) => {
                    info!("session restored from persisted token");
                    BootstrapOutcome::Authenticated {
                        perfil,
                        tokens,
                        rotated,
                    }
                }
                Err(e) => {
                    warn!(error = %e, "profile fetch rejected persisted token");
                    BootstrapOutcome::Anonymous {
                        discard_tokens: true,
                    }
                }
            }
        }
        Err(e) => {
            warn!(error = %e, "session bootstrap failed, discarding token");
            BootstrapOutcome::Anonymous {
                discard_tokens: true,
            }
        }
    }
}

/// Exchange credentials for a token pair and the user profile. No state is
/// committed here: the caller persists and transitions only on success.
pub(crate) async fn login_exchange<T: Transport>(
    transport: &T,
    email: &str,
    password: &str,
) -> Result<(Value, TokenPair), ApiError> {
    let login_req = ApiRequest {
        method: "POST".into(),
        path: LOGIN_PATH.into(),
        body: Some(serde_json::json!({ "email": email, "password": password })),
        bearer: None,
    };
    let issued = api::classify(transport.execute(&login_req).await?)?;

    let access = issued
        .get("access_token")
        .or_else(|| issued.get("accessToken"))
        .and_then(Value::as_str)
        .ok_or_else(|| ApiError::Decode("token response is missing access_token".into()))?
        .to_string();
    let refresh = issued
        .get("refresh_token")
        .or_else(|| issued.get("refreshToken"))
        .and_then(Value::as_str)
        .map(str::to_string);

    let profile_req = ApiRequest {
        method: "GET".into(),
        path: PROFILE_PATH.into(),
        body: None,
        bearer: Some(access.clone()),
    };
    let perfil = api::classify(transport.execute(&profile_req).await?)?;

    Ok((perfil, TokenPair { access, refresh }))
}

/// Create a new account. Thin passthrough; the backend does the validation
/// that matters, the caller pre-checks password confirmation.
pub(crate) async fn register_account<T: Transport>(
    transport: &T,
    payload: Value,
) -> Result<Value, ApiError> {
    let req = ApiRequest {
        method: "POST".into(),
        path: REGISTER_PATH.into(),
        body: Some(payload),
        bearer: None,
    };
    api::classify(transport.execute(&req).await?)
}

// ---------------------------------------------------------------------------
// JWT helpers
// ---------------------------------------------------------------------------

/// Best-effort peek at a JWT `exp` claim. Returns `None` for opaque tokens;
/// only used for logging, never for auth decisions (the backend decides).
pub(crate) fn token_expiry(token: &str) -> Option<DateTime<Utc>> {
    let payload = token.split('.').nth(1)?;
    let decoded = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: Value = serde_json::from_slice(&decoded).ok()?;
    let exp = claims.get("exp")?.as_i64()?;
    Utc.timestamp_opt(exp, 0).single()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::tests::{ok, status, FakeTransport};

    fn saved_tokens() -> TokenPair {
        TokenPair {
            access: "persisted-access".into(),
            refresh: Some("persisted-refresh".into()),
        }
    }

    #[tokio::test]
    async fn bootstrap_without_tokens_is_anonymous_and_offline() {
        let transport = FakeTransport::scripted(vec![]);
        let outcome = bootstrap_session(&transport, None).await;
        assert!(matches!(
            outcome,
            BootstrapOutcome::Anonymous {
                discard_tokens: false
            }
        ));
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn bootstrap_restores_profile_with_valid_token() {
        let transport =
            FakeTransport::scripted(vec![ok(r#"{"nombre":"Ana","rol":"admin"}"#)]);
        let outcome = bootstrap_session(&transport, Some(saved_tokens())).await;
        match outcome {
            BootstrapOutcome::Authenticated {
                perfil, rotated, ..
            } => {
                assert_eq!(perfil["rol"], "admin");
                assert!(!rotated);
            }
            _ => panic!("expected authenticated outcome"),
        }
    }

    #[tokio::test]
    async fn bootstrap_with_rejected_token_discards_it() {
        // profile 401, refresh rejected: end anonymous with tokens discarded
        let transport = FakeTransport::scripted(vec![status(401, ""), status(401, "")]);
        let outcome = bootstrap_session(&transport, Some(saved_tokens())).await;
        assert!(matches!(
            outcome,
            BootstrapOutcome::Anonymous {
                discard_tokens: true
            }
        ));
    }

    #[tokio::test]
    async fn bootstrap_refreshes_expired_token_transparently() {
        let transport = FakeTransport::scripted(vec![
            status(401, ""),
            ok(r#"{"access_token":"fresh"}"#),
            ok(r#"{"nombre":"Ana"}"#),
        ]);
        let outcome = bootstrap_session(&transport, Some(saved_tokens())).await;
        match outcome {
            BootstrapOutcome::Authenticated {
                tokens, rotated, ..
            } => {
                assert!(rotated);
                assert_eq!(tokens.access, "fresh");
            }
            _ => panic!("expected authenticated outcome"),
        }
    }

    #[tokio::test]
    async fn login_exchange_returns_profile_and_pair() {
        let transport = FakeTransport::scripted(vec![
            ok(r#"{"access_token":"a-1","refresh_token":"r-1"}"#),
            ok(r#"{"email":"ana@clarotec.cl"}"#),
        ]);
        let (perfil, pair) = login_exchange(&transport, "ana@clarotec.cl", "secreto")
            .await
            .unwrap();
        assert_eq!(perfil["email"], "ana@clarotec.cl");
        assert_eq!(pair.access, "a-1");
        assert_eq!(pair.refresh.as_deref(), Some("r-1"));

        let reqs = transport.requests();
        assert_eq!(reqs[0].path, LOGIN_PATH);
        assert_eq!(reqs[1].bearer.as_deref(), Some("a-1"));
    }

    #[tokio::test]
    async fn login_exchange_propagates_bad_credentials() {
        let transport = FakeTransport::scripted(vec![status(401, r#"{"error":"bad"}"#)]);
        let err = login_exchange(&transport, "ana@clarotec.cl", "nope")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized));
        assert_eq!(transport.requests().len(), 1);
    }

    #[test]
    fn snapshot_tracks_phase_transitions() {
        let state = SessionState::new();
        assert_eq!(state.snapshot()["loading"], true);

        state.set_authenticated(
            serde_json::json!({ "nombre": "Ana" }),
            TokenPair {
                access: "a".into(),
                refresh: None,
            },
        );
        let snap = state.snapshot();
        assert_eq!(snap["loading"], false);
        assert_eq!(snap["authenticated"], true);
        assert_eq!(snap["usuario"]["nombre"], "Ana");

        state.force_anonymous();
        let snap = state.snapshot();
        assert_eq!(snap["authenticated"], false);
        assert_eq!(snap["usuario"], Value::Null);
        assert!(state.token_pair().is_none());
    }

    #[test]
    fn token_expiry_reads_exp_claim() {
        // header {"alg":"none"} . payload {"exp":1700000000} . empty sig
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#);
        let payload = URL_SAFE_NO_PAD.encode(br#"{"exp":1700000000}"#);
        let token = format!("{header}.{payload}.");
        let exp = token_expiry(&token).expect("expiry");
        assert_eq!(exp.timestamp(), 1_700_000_000);

        assert!(token_expiry("opaque-token").is_none());
    }
}
