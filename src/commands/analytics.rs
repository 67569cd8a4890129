//! BI dashboard and retention commands. These are passthrough fetches: the
//! backend aggregates, the desktop client only builds the query string.

use serde_json::Value;

use crate::api::ApiState;
use crate::session::SessionState;
use crate::{api, value_str};

async fn passthrough(
    app: &tauri::AppHandle,
    api_state: &ApiState,
    session: &SessionState,
    base_path: &str,
    options: Option<&Value>,
) -> Result<Value, String> {
    let path = api::build_query(base_path, options);
    api::authed_fetch(app, api_state, session, &path, "GET", None)
        .await
        .map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn analytics_rentability(
    arg0: Option<Value>,
    app: tauri::AppHandle,
    api_state: tauri::State<'_, ApiState>,
    session: tauri::State<'_, SessionState>,
) -> Result<Value, String> {
    passthrough(
        &app,
        &api_state,
        &session,
        "/api/analitica/rentabilidad",
        arg0.as_ref(),
    )
    .await
}

#[tauri::command]
pub async fn analytics_kpis(
    arg0: Option<Value>,
    app: tauri::AppHandle,
    api_state: tauri::State<'_, ApiState>,
    session: tauri::State<'_, SessionState>,
) -> Result<Value, String> {
    passthrough(&app, &api_state, &session, "/api/analitica/kpis", arg0.as_ref()).await
}

/// Monthly trend, top products, and sales by region in one response.
#[tauri::command]
pub async fn analytics_dashboard(
    arg0: Option<Value>,
    app: tauri::AppHandle,
    api_state: tauri::State<'_, ApiState>,
    session: tauri::State<'_, SessionState>,
) -> Result<Value, String> {
    passthrough(
        &app,
        &api_state,
        &session,
        "/api/analitica/dashboard",
        arg0.as_ref(),
    )
    .await
}

#[tauri::command]
pub async fn retention_summary(
    arg0: Option<Value>,
    app: tauri::AppHandle,
    api_state: tauri::State<'_, ApiState>,
    session: tauri::State<'_, SessionState>,
) -> Result<Value, String> {
    passthrough(
        &app,
        &api_state,
        &session,
        "/api/retencion/resumen",
        arg0.as_ref(),
    )
    .await
}

#[tauri::command]
pub async fn retention_mark_contacted(
    arg0: Option<Value>,
    app: tauri::AppHandle,
    api_state: tauri::State<'_, ApiState>,
    session: tauri::State<'_, SessionState>,
) -> Result<Value, String> {
    let payload = arg0.ok_or("Missing payload")?;
    let cliente_id =
        value_str(&payload, &["clienteId", "cliente_id", "id"]).ok_or("Missing client id")?;
    let contactado = payload
        .get("contactado")
        .and_then(Value::as_bool)
        .unwrap_or(true);
    api::authed_fetch(
        &app,
        &api_state,
        &session,
        &format!("/api/retencion/clientes/{cliente_id}/contactado"),
        "POST",
        Some(serde_json::json!({ "contactado": contactado })),
    )
    .await
    .map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn retention_set_status(
    arg0: Option<Value>,
    app: tauri::AppHandle,
    api_state: tauri::State<'_, ApiState>,
    session: tauri::State<'_, SessionState>,
) -> Result<Value, String> {
    let payload = arg0.ok_or("Missing payload")?;
    let cliente_id =
        value_str(&payload, &["clienteId", "cliente_id", "id"]).ok_or("Missing client id")?;
    let estado = value_str(&payload, &["estado", "status"]).ok_or("Missing status")?;
    api::authed_fetch(
        &app,
        &api_state,
        &session,
        &format!("/api/retencion/clientes/{cliente_id}/estado"),
        "POST",
        Some(serde_json::json!({ "estado": estado })),
    )
    .await
    .map_err(|e| e.to_string())
}
