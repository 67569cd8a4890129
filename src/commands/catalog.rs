use serde_json::Value;
use tracing::info;

use crate::api::ApiState;
use crate::helpers::payload_arg0_as_string;
use crate::listing::{self, ListQuery, PanelSpec, SortKey};
use crate::session::SessionState;
use crate::{api, value_str};

const PRODUCTS_PANEL: PanelSpec = PanelSpec {
    search_fields: &["nombre", "codigo", "descripcion"],
    date_field: "created_at",
    sort_keys: &[
        ("nombre", SortKey::Text("nombre")),
        ("precio", SortKey::Number("precio_unitario")),
        ("costo", SortKey::Number("precio_compra")),
        ("fecha", SortKey::Date("created_at")),
    ],
};

const CLIENTS_PANEL: PanelSpec = PanelSpec {
    search_fields: &["nombre", "apellido", "email", "empresa", "rut"],
    date_field: "created_at",
    sort_keys: &[
        ("nombre", SortKey::FullName("nombre", "apellido")),
        ("empresa", SortKey::Text("empresa")),
        ("fecha", SortKey::Date("created_at")),
        ("pedidos", SortKey::ItemCount("pedidos")),
    ],
};

fn rows_from_response(response: Value, envelope: &str) -> Vec<Value> {
    match response {
        Value::Array(rows) => rows,
        Value::Object(mut obj) => obj
            .remove(envelope)
            .or_else(|| obj.remove("items"))
            .and_then(|v| v.as_array().cloned())
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

// -- Products ----------------------------------------------------------------

#[tauri::command]
pub async fn product_list(
    arg0: Option<Value>,
    app: tauri::AppHandle,
    api_state: tauri::State<'_, ApiState>,
    session: tauri::State<'_, SessionState>,
) -> Result<Value, String> {
    let payload = arg0.unwrap_or_else(|| serde_json::json!({}));
    let response = api::authed_fetch(&app, &api_state, &session, "/api/productos", "GET", None)
        .await
        .map_err(|e| e.to_string())?;
    let query: ListQuery = serde_json::from_value(payload).unwrap_or_default();
    Ok(listing::apply(
        rows_from_response(response, "productos"),
        &PRODUCTS_PANEL,
        &query,
    ))
}

#[tauri::command]
pub async fn product_create(
    arg0: Option<Value>,
    app: tauri::AppHandle,
    api_state: tauri::State<'_, ApiState>,
    session: tauri::State<'_, SessionState>,
) -> Result<Value, String> {
    let payload = arg0.ok_or("Missing product payload")?;
    if value_str(&payload, &["nombre", "name"]).is_none() {
        return Err("El nombre del producto es obligatorio".into());
    }
    api::authed_fetch(&app, &api_state, &session, "/api/productos", "POST", Some(payload))
        .await
        .map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn product_update(
    arg0: Option<Value>,
    app: tauri::AppHandle,
    api_state: tauri::State<'_, ApiState>,
    session: tauri::State<'_, SessionState>,
) -> Result<Value, String> {
    let payload = arg0.ok_or("Missing product payload")?;
    let id = value_str(&payload, &["id", "productoId"]).ok_or("Missing product id")?;
    api::authed_fetch(
        &app,
        &api_state,
        &session,
        &format!("/api/productos/{id}"),
        "PUT",
        Some(payload),
    )
    .await
    .map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn product_delete(
    arg0: Option<Value>,
    app: tauri::AppHandle,
    api_state: tauri::State<'_, ApiState>,
    session: tauri::State<'_, SessionState>,
) -> Result<Value, String> {
    let id = payload_arg0_as_string(arg0, &["id", "productoId"]).ok_or("Missing product id")?;
    api::authed_fetch(
        &app,
        &api_state,
        &session,
        &format!("/api/productos/{id}"),
        "DELETE",
        None,
    )
    .await
    .map_err(|e| e.to_string())
}

/// Seed the catalogue from line items seen in historical pedidos.
#[tauri::command]
pub async fn products_sync_from_orders(
    app: tauri::AppHandle,
    api_state: tauri::State<'_, ApiState>,
    session: tauri::State<'_, SessionState>,
) -> Result<Value, String> {
    let result = api::authed_fetch(
        &app,
        &api_state,
        &session,
        "/api/productos/sincronizar",
        "POST",
        None,
    )
    .await
    .map_err(|e| e.to_string())?;
    info!("product catalogue sync requested");
    Ok(result)
}

// -- Clients -----------------------------------------------------------------

#[tauri::command]
pub async fn client_list(
    arg0: Option<Value>,
    app: tauri::AppHandle,
    api_state: tauri::State<'_, ApiState>,
    session: tauri::State<'_, SessionState>,
) -> Result<Value, String> {
    let payload = arg0.unwrap_or_else(|| serde_json::json!({}));
    let response = api::authed_fetch(&app, &api_state, &session, "/api/clientes", "GET", None)
        .await
        .map_err(|e| e.to_string())?;
    let query: ListQuery = serde_json::from_value(payload).unwrap_or_default();
    Ok(listing::apply(
        rows_from_response(response, "clientes"),
        &CLIENTS_PANEL,
        &query,
    ))
}

#[tauri::command]
pub async fn client_create(
    arg0: Option<Value>,
    app: tauri::AppHandle,
    api_state: tauri::State<'_, ApiState>,
    session: tauri::State<'_, SessionState>,
) -> Result<Value, String> {
    let payload = arg0.ok_or("Missing client payload")?;
    if value_str(&payload, &["nombre", "name"]).is_none() {
        return Err("El nombre del cliente es obligatorio".into());
    }
    api::authed_fetch(&app, &api_state, &session, "/api/clientes", "POST", Some(payload))
        .await
        .map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn client_update(
    arg0: Option<Value>,
    app: tauri::AppHandle,
    api_state: tauri::State<'_, ApiState>,
    session: tauri::State<'_, SessionState>,
) -> Result<Value, String> {
    let payload = arg0.ok_or("Missing client payload")?;
    let id = value_str(&payload, &["id", "clienteId"]).ok_or("Missing client id")?;
    api::authed_fetch(
        &app,
        &api_state,
        &session,
        &format!("/api/clientes/{id}"),
        "PUT",
        Some(payload),
    )
    .await
    .map_err(|e| e.to_string())
}
