//! Local cart store for the public request flow.
//!
//! An in-memory line-item list mirrored into the `local_settings` store on
//! every mutation, so the cart survives restarts. Items come from three
//! entry widgets: a pasted product link, manual entry, or the catalog.
//! Catalog items carry the product id; adding the same catalog product
//! twice increments the existing line instead of duplicating it. Link and
//! manual items are never merged, even when their text is identical.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Mutex;
use tracing::{info, warn};

use crate::db::{self, DbState};

/// Fixed persistence key, `local` category.
const CART_KEY: &str = "cart_items";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemSource {
    #[serde(rename = "LINK")]
    Link,
    #[serde(rename = "MANUAL")]
    Manual,
    #[serde(rename = "CATALOGO")]
    Catalogo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    /// Unique per-add token (time-based).
    pub id: String,
    /// Catalog product reference; only present for CATALOGO items.
    #[serde(default, alias = "original_id")]
    pub original_id: Option<String>,
    pub source: ItemSource,
    pub name: String,
    /// Free text or URL, depending on the source widget.
    #[serde(default)]
    pub details: String,
    pub qty: u32,
    /// URL or model code; may be empty.
    #[serde(default)]
    pub referencia: String,
}

/// Fields accepted by `update_item`. Absent fields are left untouched.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItemPatch {
    pub name: Option<String>,
    pub details: Option<String>,
    pub qty: Option<u32>,
    pub referencia: Option<String>,
}

/// A new line as submitted by one of the entry widgets (no id yet).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCartItem {
    #[serde(default, alias = "original_id")]
    pub original_id: Option<String>,
    pub source: ItemSource,
    pub name: String,
    #[serde(default)]
    pub details: String,
    pub qty: u32,
    #[serde(default)]
    pub referencia: String,
}

/// Tauri managed state for the cart.
pub struct CartState {
    items: Mutex<Vec<CartItem>>,
}

impl CartState {
    /// Restore the persisted cart. Absence and parse failure both fall back
    /// to an empty cart; a corrupt snapshot must never block startup.
    pub fn load(db: &DbState) -> Self {
        let items = match read_persisted(db) {
            Ok(items) => {
                if !items.is_empty() {
                    info!(count = items.len(), "cart restored from local storage");
                }
                items
            }
            Err(e) => {
                warn!(error = %e, "persisted cart unreadable, starting empty");
                Vec::new()
            }
        };
        Self {
            items: Mutex::new(items),
        }
    }

    #[cfg(test)]
    pub fn empty() -> Self {
        Self {
            items: Mutex::new(Vec::new()),
        }
    }

    /// Add a line. A CATALOGO item whose `original_id` matches an existing
    /// CATALOGO entry increments that entry's quantity instead of inserting
    /// a duplicate. Returns the id of the affected line.
    pub fn add_item(&self, db: &DbState, new: NewCartItem) -> Result<String, String> {
        if new.qty == 0 {
            return Err("La cantidad debe ser mayor que cero".into());
        }
        let mut items = self.items.lock().map_err(|e| e.to_string())?;

        if new.source == ItemSource::Catalogo {
            if let Some(original_id) = new.original_id.as_deref() {
                if let Some(existing) = items
                    .iter_mut()
                    .find(|i| {
                        i.source == ItemSource::Catalogo
                            && i.original_id.as_deref() == Some(original_id)
                    })
                {
                    existing.qty += new.qty;
                    let id = existing.id.clone();
                    persist(db, &items)?;
                    return Ok(id);
                }
            }
        }

        let id = next_item_id(&items);
        items.push(CartItem {
            id: id.clone(),
            original_id: new.original_id,
            source: new.source,
            name: new.name,
            details: new.details,
            qty: new.qty,
            referencia: new.referencia,
        });
        persist(db, &items)?;
        Ok(id)
    }

    /// Remove the line with the given id. No-op when absent.
    pub fn remove_item(&self, db: &DbState, id: &str) -> Result<(), String> {
        let mut items = self.items.lock().map_err(|e| e.to_string())?;
        let before = items.len();
        items.retain(|i| i.id != id);
        if items.len() != before {
            persist(db, &items)?;
        }
        Ok(())
    }

    /// Shallow-merge a patch into the line with the given id. No-op when
    /// absent. A qty of 0 in the patch is rejected.
    pub fn update_item(&self, db: &DbState, id: &str, patch: CartItemPatch) -> Result<(), String> {
        if patch.qty == Some(0) {
            return Err("La cantidad debe ser mayor que cero".into());
        }
        let mut items = self.items.lock().map_err(|e| e.to_string())?;
        let Some(item) = items.iter_mut().find(|i| i.id == id) else {
            return Ok(());
        };
        if let Some(name) = patch.name {
            item.name = name;
        }
        if let Some(details) = patch.details {
            item.details = details;
        }
        if let Some(qty) = patch.qty {
            item.qty = qty;
        }
        if let Some(referencia) = patch.referencia {
            item.referencia = referencia;
        }
        persist(db, &items)?;
        Ok(())
    }

    /// Empty the cart (after a successful request submission, or manually).
    pub fn clear(&self, db: &DbState) -> Result<(), String> {
        let mut items = self.items.lock().map_err(|e| e.to_string())?;
        items.clear();
        persist(db, &items)?;
        Ok(())
    }

    pub fn items(&self) -> Vec<CartItem> {
        self.items.lock().map(|g| g.clone()).unwrap_or_default()
    }

    /// Badge count: sum of quantities across all lines.
    pub fn item_count(&self) -> u32 {
        self.items
            .lock()
            .map(|g| g.iter().map(|i| i.qty).sum())
            .unwrap_or(0)
    }
}

/// Time-based id; bumped with a suffix when two adds land on the same
/// millisecond.
fn next_item_id(items: &[CartItem]) -> String {
    let base = Utc::now().timestamp_millis().to_string();
    if !items.iter().any(|i| i.id == base) {
        return base;
    }
    let mut n = 1;
    loop {
        let candidate = format!("{base}-{n}");
        if !items.iter().any(|i| i.id == candidate) {
            return candidate;
        }
        n += 1;
    }
}

fn persist(db: &DbState, items: &[CartItem]) -> Result<(), String> {
    let value = serde_json::to_value(items).map_err(|e| format!("serialize cart: {e}"))?;
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    db::set_setting(&conn, "local", CART_KEY, &value.to_string())
}

fn read_persisted(db: &DbState) -> Result<Vec<CartItem>, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let Some(raw) = db::get_setting(&conn, "local", CART_KEY) else {
        return Ok(Vec::new());
    };
    serde_json::from_str::<Vec<CartItem>>(&raw).map_err(|e| format!("parse cart: {e}"))
}

/// The persisted snapshot as raw JSON, for the submission payload.
pub fn persisted_snapshot(db: &DbState) -> Value {
    let conn = match db.conn.lock() {
        Ok(c) => c,
        Err(_) => return Value::Null,
    };
    db::get_setting(&conn, "local", CART_KEY)
        .and_then(|raw| serde_json::from_str(&raw).ok())
        .unwrap_or(Value::Null)
}
