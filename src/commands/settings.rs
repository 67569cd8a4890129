use serde_json::Value;
use tracing::info;

use crate::api::ApiState;
use crate::cart::CartState;
use crate::helpers::payload_arg0_as_string;
use crate::session::SessionState;
use crate::{api, db, storage, value_str};

#[tauri::command]
pub async fn settings_get_api_url(
    api_state: tauri::State<'_, ApiState>,
) -> Result<Value, String> {
    Ok(serde_json::json!({
        "baseUrl": api_state.base_url(),
        "configured": storage::is_configured(),
    }))
}

#[tauri::command]
pub async fn settings_set_api_url(
    arg0: Option<Value>,
    api_state: tauri::State<'_, ApiState>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let raw = payload_arg0_as_string(arg0, &["baseUrl", "base_url", "url"])
        .ok_or("Missing backend URL")?;
    if api::normalize_base_url(&raw).is_empty() {
        return Err("Backend URL is not valid".into());
    }
    let normalized = api_state.set_base_url(&raw);
    storage::set_credential(storage::KEY_API_BASE_URL, &normalized)?;
    // Mirror for diagnostics; the keyring copy is authoritative.
    if let Ok(conn) = db.conn.lock() {
        let _ = db::set_setting(&conn, "local", "api_base_url", &normalized);
    }
    info!(base_url = %normalized, "backend URL updated");
    Ok(serde_json::json!({ "baseUrl": normalized }))
}

#[tauri::command]
pub async fn settings_is_configured() -> Result<bool, String> {
    Ok(storage::is_configured())
}

#[tauri::command]
pub async fn settings_get_local(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let key = payload_arg0_as_string(arg0, &["key", "settingKey"]).ok_or("Missing setting key")?;
    let parsed = crate::helpers::read_local_json(&db, &key)?;
    if !parsed.is_null() {
        return Ok(parsed);
    }
    // Non-JSON legacy values come back as plain strings.
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    Ok(db::get_setting(&conn, "local", &key)
        .map(Value::String)
        .unwrap_or(Value::Null))
}

#[tauri::command]
pub async fn settings_set_local(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
) -> Result<(), String> {
    let payload = arg0.ok_or("Missing setting payload")?;
    let key = value_str(&payload, &["key", "settingKey"]).ok_or("Missing setting key")?;
    let value = payload.get("value").cloned().unwrap_or(Value::Null);
    crate::helpers::write_local_json(&db, &key, &value)
}

/// Wipe credentials, local settings, the cart, and the session.
#[tauri::command]
pub async fn settings_factory_reset(
    api_state: tauri::State<'_, ApiState>,
    session: tauri::State<'_, SessionState>,
    cart: tauri::State<'_, CartState>,
    db: tauri::State<'_, db::DbState>,
    app: tauri::AppHandle,
) -> Result<Value, String> {
    use tauri::Emitter;
    api_state.cancel_in_flight();
    storage::factory_reset()?;
    session.force_anonymous();
    cart.clear(&db)?;
    {
        let conn = db.conn.lock().map_err(|e| e.to_string())?;
        db::delete_all_settings(&conn, "local")?;
        db::delete_all_settings(&conn, "security")?;
    }
    let _ = app.emit("factory_reset", serde_json::json!({}));
    info!("factory reset completed");
    Ok(serde_json::json!({ "success": true }))
}
