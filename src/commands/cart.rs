use serde_json::Value;
use tracing::info;

use crate::api::ApiState;
use crate::cart::{CartItemPatch, CartState, NewCartItem};
use crate::helpers::{payload_arg0_as_string, validate_contacto};
use crate::{api, db, value_str};

const SUBMIT_PATH: &str = "/api/solicitudes";

#[tauri::command]
pub async fn cart_get(cart: tauri::State<'_, CartState>) -> Result<Value, String> {
    serde_json::to_value(cart.items()).map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn cart_item_count(cart: tauri::State<'_, CartState>) -> Result<u32, String> {
    Ok(cart.item_count())
}

#[tauri::command]
pub async fn cart_add_item(
    arg0: Option<Value>,
    cart: tauri::State<'_, CartState>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let payload = arg0.ok_or("Missing cart item payload")?;
    let new: NewCartItem =
        serde_json::from_value(payload).map_err(|e| format!("Invalid cart item: {e}"))?;
    let id = cart.add_item(&db, new)?;
    Ok(serde_json::json!({ "id": id }))
}

#[tauri::command]
pub async fn cart_update_item(
    arg0: Option<Value>,
    cart: tauri::State<'_, CartState>,
    db: tauri::State<'_, db::DbState>,
) -> Result<(), String> {
    let payload = arg0.ok_or("Missing cart update payload")?;
    let id = value_str(&payload, &["id", "itemId"]).ok_or("Missing cart item id")?;
    let patch: CartItemPatch =
        serde_json::from_value(payload).map_err(|e| format!("Invalid cart patch: {e}"))?;
    cart.update_item(&db, &id, patch)
}

#[tauri::command]
pub async fn cart_remove_item(
    arg0: Option<Value>,
    cart: tauri::State<'_, CartState>,
    db: tauri::State<'_, db::DbState>,
) -> Result<(), String> {
    let id = payload_arg0_as_string(arg0, &["id", "itemId"]).ok_or("Missing cart item id")?;
    cart.remove_item(&db, &id)
}

#[tauri::command]
pub async fn cart_clear(
    cart: tauri::State<'_, CartState>,
    db: tauri::State<'_, db::DbState>,
) -> Result<(), String> {
    cart.clear(&db)
}

fn validate_direccion(payload: &Value) -> Result<(), String> {
    let direccion = payload
        .get("direccion")
        .or_else(|| payload.get("address"))
        .cloned()
        .unwrap_or(Value::Null);
    if value_str(&direccion, &["calle", "street"]).is_none() {
        return Err("La dirección de despacho es obligatoria".into());
    }
    if value_str(&direccion, &["ciudad", "comuna", "city"]).is_none() {
        return Err("La ciudad o comuna es obligatoria".into());
    }
    Ok(())
}

/// Public request flow: contact + shipping address + the current cart go up
/// as one payload; the cart is cleared only after the backend accepts it.
#[tauri::command]
pub async fn cart_submit_request(
    arg0: Option<Value>,
    api_state: tauri::State<'_, ApiState>,
    cart: tauri::State<'_, CartState>,
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    let payload = arg0.ok_or("Missing request payload")?;
    let contacto = payload
        .get("contacto")
        .or_else(|| payload.get("contact"))
        .cloned()
        .unwrap_or_else(|| payload.clone());
    validate_contacto(&contacto)?;
    validate_direccion(&payload)?;

    let items = serde_json::to_value(cart.items()).map_err(|e| e.to_string())?;
    if items.as_array().map(Vec::is_empty).unwrap_or(true) {
        return Err("El carro está vacío".into());
    }

    let mut body = serde_json::Map::new();
    body.insert("contacto".into(), contacto);
    body.insert(
        "direccion".into(),
        payload
            .get("direccion")
            .or_else(|| payload.get("address"))
            .cloned()
            .unwrap_or(Value::Null),
    );
    if let Some(comentario) = value_str(&payload, &["comentario", "comment", "notas"]) {
        body.insert("comentario".into(), Value::String(comentario));
    }
    body.insert("items".into(), items);

    let response = api::public_fetch(&api_state, SUBMIT_PATH, "POST", Some(Value::Object(body)))
        .await
        .map_err(|e| e.to_string())?;

    let seguimiento = value_str(&response, &["id_seguimiento", "idSeguimiento"])
        .ok_or("El servidor no entregó un código de seguimiento")?;

    // Cache the acknowledged snapshot so the tracking view works offline.
    if let Ok(conn) = db.conn.lock() {
        let _ = db::cache_pedido(&conn, &response);
    }
    cart.clear(&db)?;
    info!(id_seguimiento = %seguimiento, "request submitted");
    Ok(serde_json::json!({ "idSeguimiento": seguimiento, "pedido": response }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direccion_requires_street_and_city() {
        let ok = serde_json::json!({
            "direccion": { "calle": "Av. Italia 1234", "ciudad": "Santiago" }
        });
        assert!(validate_direccion(&ok).is_ok());

        let missing_city = serde_json::json!({
            "direccion": { "calle": "Av. Italia 1234" }
        });
        assert!(validate_direccion(&missing_city).is_err());

        assert!(validate_direccion(&serde_json::json!({})).is_err());
    }
}
