use serde_json::Value;

use crate::{db, diagnostics};

#[tauri::command]
pub async fn diagnostics_get_about() -> Result<Value, String> {
    Ok(diagnostics::get_about_info())
}

#[tauri::command]
pub async fn diagnostics_get_system_health(
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    diagnostics::get_system_health(&db)
}

#[tauri::command]
pub async fn database_health_check(
    db: tauri::State<'_, db::DbState>,
) -> Result<Value, String> {
    db::health_check(&db)
}

#[tauri::command]
pub async fn database_get_stats(db: tauri::State<'_, db::DbState>) -> Result<Value, String> {
    db::stats(&db)
}
