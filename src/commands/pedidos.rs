use serde_json::Value;
use tracing::{info, warn};

use crate::api::ApiState;
use crate::helpers::{payload_arg0_as_string, validate_external_url};
use crate::listing::{self, ListQuery, PanelSpec, SortKey};
use crate::pedidos::{self, Estado};
use crate::pricing::{self, LineaPedido};
use crate::session::SessionState;
use crate::{api, db, value_f64, value_str};

const PANEL: PanelSpec = PanelSpec {
    search_fields: &[
        "id",
        "id_seguimiento",
        "/contacto/nombre",
        "/contacto/email",
        "/contacto/empresa",
    ],
    date_field: "created_at",
    sort_keys: &[
        ("fecha", SortKey::Date("created_at")),
        ("cliente", SortKey::FullName("/contacto/nombre", "/contacto/apellido")),
        ("total", SortKey::Number("total")),
        ("items", SortKey::ItemCount("items")),
    ],
};

fn pedido_path(id: &str) -> String {
    format!("/api/pedidos/{id}")
}

fn tracking_path(seguimiento: &str) -> String {
    format!("/api/pedidos/seguimiento/{seguimiento}")
}

/// Tracking ids are UUIDs; rejecting anything else keeps typos off the wire.
fn parse_tracking_id(raw: &str) -> Result<String, String> {
    let trimmed = raw.trim();
    uuid::Uuid::parse_str(trimmed)
        .map_err(|_| "El código de seguimiento no es válido".to_string())?;
    Ok(trimmed.to_string())
}

fn rows_from_response(response: Value) -> Vec<Value> {
    match response {
        Value::Array(rows) => rows,
        Value::Object(mut obj) => obj
            .remove("pedidos")
            .or_else(|| obj.remove("items"))
            .and_then(|v| v.as_array().cloned())
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

fn cache_snapshot(db: &db::DbState, pedido: &Value) {
    if let Ok(conn) = db.conn.lock() {
        if let Err(e) = db::cache_pedido(&conn, pedido) {
            warn!(error = %e, "failed to cache pedido snapshot");
        }
    }
}

/// State-changing calls never trust the acknowledgment body: the full
/// pedido is re-fetched so the caller always sees the server's version.
async fn refetch_authed(
    app: &tauri::AppHandle,
    api_state: &ApiState,
    session: &SessionState,
    db: &db::DbState,
    id: &str,
) -> Result<Value, String> {
    let fresh = api::authed_fetch(app, api_state, session, &pedido_path(id), "GET", None)
        .await
        .map_err(|e| e.to_string())?;
    cache_snapshot(db, &fresh);
    Ok(fresh)
}

async fn refetch_public(
    api_state: &ApiState,
    db: &db::DbState,
    seguimiento: &str,
) -> Result<Value, String> {
    let fresh = api::public_fetch(api_state, &tracking_path(seguimiento), "GET", None)
        .await
        .map_err(|e| e.to_string())?;
    cache_snapshot(db, &fresh);
    Ok(fresh)
}

// -- Listing -----------------------------------------------------------------

#[tauri::command]
pub async fn pedidos_list(
    arg0: Option<Value>,
    app: tauri::AppHandle,
    api_state: tauri::State<'_, ApiState>,
    session: tauri::State<'_, SessionState>,
) -> Result<Value, String> {
    let payload = arg0.unwrap_or_else(|| serde_json::json!({}));
    let stage = value_str(&payload, &["stage", "etapa", "estado"]);
    let estado = stage
        .as_deref()
        .and_then(|s| pedidos::stage_filter(s).or_else(|| Estado::parse(s).map(|e| e.as_str())));

    let path = api::build_query(
        "/api/pedidos",
        Some(&serde_json::json!({ "estado": estado })),
    );
    let response = api::authed_fetch(&app, &api_state, &session, &path, "GET", None)
        .await
        .map_err(|e| e.to_string())?;

    let query: ListQuery = serde_json::from_value(payload).unwrap_or_default();
    Ok(listing::apply(rows_from_response(response), &PANEL, &query))
}

// -- Detail ------------------------------------------------------------------

#[tauri::command]
pub async fn pedido_get(
    arg0: Option<Value>,
    app: tauri::AppHandle,
    api_state: tauri::State<'_, ApiState>,
    session: tauri::State<'_, SessionState>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let id = payload_arg0_as_string(arg0, &["id", "pedidoId"]).ok_or("Missing pedido id")?;
    match api::authed_fetch(&app, &api_state, &session, &pedido_path(&id), "GET", None).await {
        Ok(fresh) => {
            cache_snapshot(&db, &fresh);
            Ok(fresh)
        }
        Err(api::ApiError::Unauthorized) => Err(api::ApiError::Unauthorized.to_string()),
        Err(e) => {
            // Detail view degrades to the last cached snapshot offline.
            let cached = db
                .conn
                .lock()
                .ok()
                .and_then(|conn| db::cached_pedido(&conn, &id));
            match cached {
                Some(mut snapshot) => {
                    warn!(id = %id, error = %e, "serving cached pedido snapshot");
                    if let Some(obj) = snapshot.as_object_mut() {
                        obj.insert("_cached".into(), Value::Bool(true));
                    }
                    Ok(snapshot)
                }
                None => Err(e.to_string()),
            }
        }
    }
}

#[tauri::command]
pub async fn pedido_track(
    arg0: Option<Value>,
    api_state: tauri::State<'_, ApiState>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let seguimiento = payload_arg0_as_string(arg0, &["idSeguimiento", "id_seguimiento", "id"])
        .ok_or("Missing tracking id")?;
    let seguimiento = parse_tracking_id(&seguimiento)?;
    match api::public_fetch(&api_state, &tracking_path(&seguimiento), "GET", None).await {
        Ok(fresh) => {
            cache_snapshot(&db, &fresh);
            let options = pedidos::parse_shipping_options(&fresh);
            let estado = value_str(&fresh, &["estado"])
                .and_then(|s| Estado::parse(&s))
                .unwrap_or(Estado::Solicitud);
            let actions = estado.client_actions(!options.is_empty());
            Ok(serde_json::json!({ "pedido": fresh, "acciones": actions }))
        }
        Err(e) => {
            let cached = db
                .conn
                .lock()
                .ok()
                .and_then(|conn| db::cached_pedido(&conn, &seguimiento));
            match cached {
                Some(snapshot) => {
                    warn!(error = %e, "serving cached tracking snapshot");
                    Ok(serde_json::json!({
                        "pedido": snapshot,
                        "acciones": [],
                        "cached": true,
                    }))
                }
                None => Err(e.to_string()),
            }
        }
    }
}

// -- Staff editor ------------------------------------------------------------

fn parse_lineas(payload: &Value) -> Result<Vec<LineaPedido>, String> {
    let items = payload
        .get("items")
        .or_else(|| payload.get("lineas"))
        .cloned()
        .ok_or("Missing line items")?;
    serde_json::from_value(items).map_err(|e| format!("Invalid line items: {e}"))
}

#[tauri::command]
pub async fn pedido_update_items(
    arg0: Option<Value>,
    app: tauri::AppHandle,
    api_state: tauri::State<'_, ApiState>,
    session: tauri::State<'_, SessionState>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let payload = arg0.ok_or("Missing payload")?;
    let id = value_str(&payload, &["id", "pedidoId"]).ok_or("Missing pedido id")?;
    let lineas = parse_lineas(&payload)?;
    let body = serde_json::json!({
        "items": lineas,
    });
    api::authed_fetch(
        &app,
        &api_state,
        &session,
        &format!("{}/items", pedido_path(&id)),
        "PUT",
        Some(body),
    )
    .await
    .map_err(|e| e.to_string())?;
    refetch_authed(&app, &api_state, &session, &db, &id).await
}

/// Reprice every line from its cost via the target margin, then persist.
#[tauri::command]
pub async fn pedido_apply_margin(
    arg0: Option<Value>,
    app: tauri::AppHandle,
    api_state: tauri::State<'_, ApiState>,
    session: tauri::State<'_, SessionState>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let payload = arg0.ok_or("Missing payload")?;
    let id = value_str(&payload, &["id", "pedidoId"]).ok_or("Missing pedido id")?;
    let margen = value_f64(&payload, &["margen", "margin"]).ok_or("Missing target margin")?;

    let pedido = api::authed_fetch(&app, &api_state, &session, &pedido_path(&id), "GET", None)
        .await
        .map_err(|e| e.to_string())?;
    let mut lineas: Vec<LineaPedido> = serde_json::from_value(
        pedido.get("items").cloned().unwrap_or(Value::Array(vec![])),
    )
    .map_err(|e| format!("Invalid line items: {e}"))?;

    for linea in &mut lineas {
        linea.precio_unitario = pricing::price_for_margin(linea.precio_compra, margen)
            .ok_or("El margen debe estar entre 0 y 100")?;
    }

    api::authed_fetch(
        &app,
        &api_state,
        &session,
        &format!("{}/items", pedido_path(&id)),
        "PUT",
        Some(serde_json::json!({ "items": lineas })),
    )
    .await
    .map_err(|e| e.to_string())?;
    refetch_authed(&app, &api_state, &session, &db, &id).await
}

#[tauri::command]
pub async fn pedido_quote(
    arg0: Option<Value>,
    app: tauri::AppHandle,
    api_state: tauri::State<'_, ApiState>,
    session: tauri::State<'_, SessionState>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let mut payload = arg0.ok_or("Missing payload")?;
    let id = value_str(&payload, &["id", "pedidoId"]).ok_or("Missing pedido id")?;
    if let Some(obj) = payload.as_object_mut() {
        obj.remove("id");
        obj.remove("pedidoId");
    }
    api::authed_fetch(
        &app,
        &api_state,
        &session,
        &format!("{}/cotizar", pedido_path(&id)),
        "POST",
        Some(payload),
    )
    .await
    .map_err(|e| e.to_string())?;
    refetch_authed(&app, &api_state, &session, &db, &id).await
}

#[tauri::command]
pub async fn pedido_shipping_quote(
    arg0: Option<Value>,
    app: tauri::AppHandle,
    api_state: tauri::State<'_, ApiState>,
    session: tauri::State<'_, SessionState>,
) -> Result<Value, String> {
    let payload = arg0.ok_or("Missing payload")?;
    let id = value_str(&payload, &["id", "pedidoId"]).ok_or("Missing pedido id")?;
    api::authed_fetch(
        &app,
        &api_state,
        &session,
        &format!("{}/envio/calcular", pedido_path(&id)),
        "POST",
        payload.get("direccion").cloned().map(|d| serde_json::json!({ "direccion": d })),
    )
    .await
    .map_err(|e| e.to_string())
}

// -- Client tracking actions (unauthenticated) -------------------------------

#[tauri::command]
pub async fn pedido_select_shipping(
    arg0: Option<Value>,
    api_state: tauri::State<'_, ApiState>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let payload = arg0.ok_or("Missing payload")?;
    let seguimiento = value_str(&payload, &["idSeguimiento", "id_seguimiento"])
        .ok_or("Missing tracking id")?;
    let seguimiento = parse_tracking_id(&seguimiento)?;
    let metodo = value_str(&payload, &["metodo", "metodoEnvio", "metodo_envio"])
        .ok_or("Missing shipping method")?;

    let pedido = api::public_fetch(&api_state, &tracking_path(&seguimiento), "GET", None)
        .await
        .map_err(|e| e.to_string())?;
    let options = pedidos::parse_shipping_options(&pedido);
    if !options.contains_key(&metodo) {
        return Err(format!("El método de envío '{metodo}' no está disponible"));
    }

    api::public_fetch(
        &api_state,
        &format!("{}/envio", tracking_path(&seguimiento)),
        "POST",
        Some(serde_json::json!({ "metodo_envio": metodo })),
    )
    .await
    .map_err(|e| e.to_string())?;
    refetch_public(&api_state, &db, &seguimiento).await
}

#[tauri::command]
pub async fn pedido_accept_client(
    arg0: Option<Value>,
    api_state: tauri::State<'_, ApiState>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let seguimiento = payload_arg0_as_string(arg0, &["idSeguimiento", "id_seguimiento"])
        .ok_or("Missing tracking id")?;
    let seguimiento = parse_tracking_id(&seguimiento)?;
    let pedido = api::public_fetch(&api_state, &tracking_path(&seguimiento), "GET", None)
        .await
        .map_err(|e| e.to_string())?;
    // Guard runs before the accept call ever goes out.
    pedidos::validate_accept(&pedido)?;
    api::public_fetch(
        &api_state,
        &format!("{}/aceptar", tracking_path(&seguimiento)),
        "POST",
        None,
    )
    .await
    .map_err(|e| e.to_string())?;
    refetch_public(&api_state, &db, &seguimiento).await
}

#[tauri::command]
pub async fn pedido_reject_client(
    arg0: Option<Value>,
    api_state: tauri::State<'_, ApiState>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let payload = arg0.ok_or("Missing payload")?;
    let seguimiento = value_str(&payload, &["idSeguimiento", "id_seguimiento"])
        .ok_or("Missing tracking id")?;
    let seguimiento = parse_tracking_id(&seguimiento)?;
    let motivo = value_str(&payload, &["motivo", "reason"]);
    api::public_fetch(
        &api_state,
        &format!("{}/rechazar", tracking_path(&seguimiento)),
        "POST",
        Some(serde_json::json!({ "motivo": motivo })),
    )
    .await
    .map_err(|e| e.to_string())?;
    refetch_public(&api_state, &db, &seguimiento).await
}

#[tauri::command]
pub async fn pedido_confirm_receipt(
    arg0: Option<Value>,
    api_state: tauri::State<'_, ApiState>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let seguimiento = payload_arg0_as_string(arg0, &["idSeguimiento", "id_seguimiento"])
        .ok_or("Missing tracking id")?;
    let seguimiento = parse_tracking_id(&seguimiento)?;
    let pedido = api::public_fetch(&api_state, &tracking_path(&seguimiento), "GET", None)
        .await
        .map_err(|e| e.to_string())?;
    pedidos::validate_confirm_receipt(&pedido)?;
    api::public_fetch(
        &api_state,
        &format!("{}/recepcion", tracking_path(&seguimiento)),
        "POST",
        None,
    )
    .await
    .map_err(|e| e.to_string())?;
    refetch_public(&api_state, &db, &seguimiento).await
}

// -- Staff lifecycle actions -------------------------------------------------

async fn staff_transition(
    app: &tauri::AppHandle,
    api_state: &ApiState,
    session: &SessionState,
    db: &db::DbState,
    id: &str,
    action: &str,
    body: Option<Value>,
) -> Result<Value, String> {
    api::authed_fetch(
        app,
        api_state,
        session,
        &format!("{}/{action}", pedido_path(id)),
        "POST",
        body,
    )
    .await
    .map_err(|e| e.to_string())?;
    refetch_authed(app, api_state, session, db, id).await
}

#[tauri::command]
pub async fn pedido_accept(
    arg0: Option<Value>,
    app: tauri::AppHandle,
    api_state: tauri::State<'_, ApiState>,
    session: tauri::State<'_, SessionState>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let id = payload_arg0_as_string(arg0, &["id", "pedidoId"]).ok_or("Missing pedido id")?;
    let pedido = api::authed_fetch(&app, &api_state, &session, &pedido_path(&id), "GET", None)
        .await
        .map_err(|e| e.to_string())?;
    pedidos::validate_accept(&pedido)?;
    staff_transition(&app, &api_state, &session, &db, &id, "aceptar", None).await
}

#[tauri::command]
pub async fn pedido_reject(
    arg0: Option<Value>,
    app: tauri::AppHandle,
    api_state: tauri::State<'_, ApiState>,
    session: tauri::State<'_, SessionState>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let payload = arg0.ok_or("Missing payload")?;
    let id = value_str(&payload, &["id", "pedidoId"]).ok_or("Missing pedido id")?;
    let motivo = value_str(&payload, &["motivo", "reason"]);
    let body = serde_json::json!({ "motivo": motivo });
    staff_transition(&app, &api_state, &session, &db, &id, "rechazar", Some(body)).await
}

#[tauri::command]
pub async fn pedido_confirm_payment(
    arg0: Option<Value>,
    app: tauri::AppHandle,
    api_state: tauri::State<'_, ApiState>,
    session: tauri::State<'_, SessionState>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let payload = arg0.ok_or("Missing payload")?;
    let id = value_str(&payload, &["id", "pedidoId"]).ok_or("Missing pedido id")?;
    let body = payload.get("pago").cloned();
    staff_transition(&app, &api_state, &session, &db, &id, "pago/confirmar", body).await
}

#[tauri::command]
pub async fn pedido_reject_payment(
    arg0: Option<Value>,
    app: tauri::AppHandle,
    api_state: tauri::State<'_, ApiState>,
    session: tauri::State<'_, SessionState>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let payload = arg0.ok_or("Missing payload")?;
    let id = value_str(&payload, &["id", "pedidoId"]).ok_or("Missing pedido id")?;
    let motivo = value_str(&payload, &["motivo", "reason"]);
    let body = serde_json::json!({ "motivo": motivo });
    staff_transition(&app, &api_state, &session, &db, &id, "pago/rechazar", Some(body)).await
}

#[tauri::command]
pub async fn pedido_mark_dispatched(
    arg0: Option<Value>,
    app: tauri::AppHandle,
    api_state: tauri::State<'_, ApiState>,
    session: tauri::State<'_, SessionState>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let payload = arg0.ok_or("Missing payload")?;
    let id = value_str(&payload, &["id", "pedidoId"]).ok_or("Missing pedido id")?;
    let body = serde_json::json!({
        "transportista": value_str(&payload, &["transportista", "carrier"]),
        "numero_guia": value_str(&payload, &["numeroGuia", "numero_guia", "tracking"]),
    });
    staff_transition(&app, &api_state, &session, &db, &id, "despachar", Some(body)).await
}

#[tauri::command]
pub async fn pedido_send_email(
    arg0: Option<Value>,
    app: tauri::AppHandle,
    api_state: tauri::State<'_, ApiState>,
    session: tauri::State<'_, SessionState>,
) -> Result<Value, String> {
    let id = payload_arg0_as_string(arg0, &["id", "pedidoId"]).ok_or("Missing pedido id")?;
    let ack = api::authed_fetch(
        &app,
        &api_state,
        &session,
        &format!("{}/email", pedido_path(&id)),
        "POST",
        None,
    )
    .await
    .map_err(|e| e.to_string())?;
    info!(id = %id, "quotation email requested");
    Ok(ack)
}

/// Fetch the quotation PDF URL and hand it to the system browser.
#[tauri::command]
pub async fn pedido_open_pdf(
    arg0: Option<Value>,
    app: tauri::AppHandle,
    api_state: tauri::State<'_, ApiState>,
    session: tauri::State<'_, SessionState>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let id = payload_arg0_as_string(arg0, &["id", "pedidoId"]).ok_or("Missing pedido id")?;
    let response = api::authed_fetch(
        &app,
        &api_state,
        &session,
        &format!("{}/pdf", pedido_path(&id)),
        "GET",
        None,
    )
    .await
    .map_err(|e| e.to_string())?;
    let url_raw = value_str(&response, &["url", "pdfUrl", "pdf_url"])
        .ok_or("El servidor no entregó la URL del PDF")?;
    let parsed = validate_external_url(&url_raw, Some(&db))?;
    webbrowser::open(parsed.as_str()).map_err(|e| format!("Failed to open PDF: {e}"))?;
    info!(id = %id, host = %parsed.host_str().unwrap_or("unknown"), "PDF opened in browser");
    Ok(serde_json::json!({ "opened": true, "url": parsed.as_str() }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_unwrap_plain_arrays_and_envelopes() {
        let plain = serde_json::json!([{ "id": 1 }, { "id": 2 }]);
        assert_eq!(rows_from_response(plain).len(), 2);

        let enveloped = serde_json::json!({ "pedidos": [{ "id": 1 }] });
        assert_eq!(rows_from_response(enveloped).len(), 1);

        assert!(rows_from_response(serde_json::json!("nope")).is_empty());
    }

    #[test]
    fn tracking_ids_must_be_uuids() {
        assert!(parse_tracking_id("3fa85f64-5717-4562-b3fc-2c963f66afa6").is_ok());
        assert!(parse_tracking_id(" 3fa85f64-5717-4562-b3fc-2c963f66afa6 ").is_ok());
        assert!(parse_tracking_id("42").is_err());
        assert!(parse_tracking_id("").is_err());
    }

    #[test]
    fn lineas_parse_with_snake_and_camel_keys() {
        let payload = serde_json::json!({
            "items": [{
                "id": "l1",
                "descripcion": "Perfil de aluminio",
                "cantidad": 4,
                "precioUnitario": 2500,
                "precio_compra": 1800,
            }],
        });
        let lineas = parse_lineas(&payload).unwrap();
        assert_eq!(lineas.len(), 1);
        assert_eq!(lineas[0].precio_unitario, 2500);
        assert_eq!(lineas[0].precio_compra, 1800);
    }
}
