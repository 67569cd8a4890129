use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use crate::api::{ApiState, TokenPair};
use crate::session::{self, BootstrapOutcome, SessionState};
use crate::{api, storage, value_str};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginPayload {
    #[serde(alias = "correo")]
    email: String,
    password: String,
}

fn parse_login_payload(arg0: Option<Value>) -> Result<LoginPayload, String> {
    let payload = arg0.ok_or("Missing login payload")?;
    let parsed: LoginPayload =
        serde_json::from_value(payload).map_err(|e| format!("Invalid login payload: {e}"))?;
    if parsed.email.trim().is_empty() || parsed.password.is_empty() {
        return Err("Email y contraseña son obligatorios".into());
    }
    Ok(parsed)
}

/// Hydrate the session from persisted tokens. Shared by the startup task in
/// `lib.rs` and the `session_bootstrap` command.
pub(crate) async fn bootstrap_and_apply(app: &tauri::AppHandle) -> Value {
    use tauri::Manager;
    let api_state = app.state::<ApiState>();
    let session_state = app.state::<SessionState>();

    let saved = storage::load_tokens().map(|saved| TokenPair {
        access: saved.access.to_string(),
        refresh: saved.refresh.as_deref().map(|s| s.to_string()),
    });

    match session::bootstrap_session(&*api_state, saved).await {
        BootstrapOutcome::Authenticated {
            perfil,
            tokens,
            rotated,
        } => {
            if rotated {
                let _ = storage::save_tokens(&tokens.access, tokens.refresh.as_deref());
            }
            session_state.set_authenticated(perfil, tokens);
        }
        BootstrapOutcome::Anonymous { discard_tokens } => {
            if discard_tokens {
                storage::clear_tokens();
            }
            session_state.force_anonymous();
        }
    }
    session_state.snapshot()
}

#[tauri::command]
pub async fn session_bootstrap(app: tauri::AppHandle) -> Result<Value, String> {
    Ok(bootstrap_and_apply(&app).await)
}

#[tauri::command]
pub async fn session_get(
    session: tauri::State<'_, SessionState>,
) -> Result<Value, String> {
    Ok(session.snapshot())
}

#[tauri::command]
pub async fn session_login(
    arg0: Option<Value>,
    api_state: tauri::State<'_, ApiState>,
    session: tauri::State<'_, SessionState>,
) -> Result<Value, String> {
    let payload = parse_login_payload(arg0)?;
    let (perfil, tokens) = session::login_exchange(
        &*api_state,
        payload.email.trim(),
        &payload.password,
    )
    .await
    .map_err(|e| e.to_string())?;

    storage::save_tokens(&tokens.access, tokens.refresh.as_deref())?;
    session.set_authenticated(perfil, tokens);
    info!("user logged in");
    Ok(session.snapshot())
}

#[tauri::command]
pub async fn session_logout(
    api_state: tauri::State<'_, ApiState>,
    session: tauri::State<'_, SessionState>,
    app: tauri::AppHandle,
) -> Result<(), String> {
    use tauri::Emitter;
    api_state.cancel_in_flight();
    storage::clear_tokens();
    session.force_anonymous();
    let _ = app.emit("session_logout", serde_json::json!({ "reason": "logout" }));
    info!("user logged out");
    Ok(())
}

#[tauri::command]
pub async fn session_register(
    arg0: Option<Value>,
    api_state: tauri::State<'_, ApiState>,
) -> Result<Value, String> {
    let payload = arg0.ok_or("Missing registration payload")?;
    let password = value_str(&payload, &["password"]).unwrap_or_default();
    let confirm = value_str(&payload, &["passwordConfirm", "password_confirm", "confirmar"])
        .unwrap_or_default();
    if password.len() < 8 {
        return Err("La contraseña debe tener al menos 8 caracteres".into());
    }
    if password != confirm {
        return Err("Las contraseñas no coinciden".into());
    }
    session::register_account(&*api_state, payload)
        .await
        .map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn profile_get(
    app: tauri::AppHandle,
    api_state: tauri::State<'_, ApiState>,
    session: tauri::State<'_, SessionState>,
) -> Result<Value, String> {
    let perfil = api::authed_fetch(&app, &api_state, &session, "/api/auth/perfil", "GET", None)
        .await
        .map_err(|e| e.to_string())?;
    session.update_perfil(perfil.clone());
    Ok(perfil)
}

#[tauri::command]
pub async fn profile_update(
    arg0: Option<Value>,
    app: tauri::AppHandle,
    api_state: tauri::State<'_, ApiState>,
    session: tauri::State<'_, SessionState>,
) -> Result<Value, String> {
    let payload = arg0.ok_or("Missing profile payload")?;
    let perfil = api::authed_fetch(
        &app,
        &api_state,
        &session,
        "/api/auth/perfil",
        "PATCH",
        Some(payload),
    )
    .await
    .map_err(|e| e.to_string())?;
    session.update_perfil(perfil.clone());
    Ok(perfil)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_payload_requires_both_fields() {
        assert!(parse_login_payload(None).is_err());
        assert!(parse_login_payload(Some(serde_json::json!({ "email": "a@b.cl" }))).is_err());
        assert!(parse_login_payload(Some(serde_json::json!({
            "email": "  ",
            "password": "x",
        })))
        .is_err());

        let ok = parse_login_payload(Some(serde_json::json!({
            "correo": "ana@empresa.cl",
            "password": "secreto123",
        })))
        .unwrap();
        assert_eq!(ok.email, "ana@empresa.cl");
    }
}
