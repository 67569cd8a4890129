//! Local SQLite cache for the Clarotec client.
//!
//! Uses rusqlite with WAL mode. Holds the `local_settings` category/key/value
//! store (cart persistence, UI preferences, API base URL mirror) and the
//! `pedido_cache` snapshot table the detail views fall back to when the
//! backend is unreachable. The server remains the source of truth for every
//! pedido; nothing here is ever synced back.

use rusqlite::{params, Connection};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{info, warn};

/// Tauri managed state holding the database connection.
pub struct DbState {
    pub conn: Mutex<Connection>,
    pub db_path: PathBuf,
}

/// Current schema version. Bump when adding new migrations.
const CURRENT_SCHEMA_VERSION: i32 = 3;

/// Initialize the database at `{app_data_dir}/clarotec.db`.
///
/// Creates the directory if needed, opens the connection, sets pragmas,
/// and runs any pending migrations. On corruption or open failure,
/// deletes the file and retries once; the cache is always rebuildable
/// from the backend.
pub fn init(app_data_dir: &Path) -> Result<DbState, String> {
    fs::create_dir_all(app_data_dir).map_err(|e| format!("Failed to create data dir: {e}"))?;

    let db_path = app_data_dir.join("clarotec.db");
    info!("Opening database at {}", db_path.display());

    let conn = match open_and_configure(&db_path) {
        Ok(c) => c,
        Err(first_err) => {
            warn!(
                "Database open failed ({}), deleting and retrying once",
                first_err
            );
            if db_path.exists() {
                let _ = fs::remove_file(&db_path);
                let wal = db_path.with_extension("db-wal");
                let shm = db_path.with_extension("db-shm");
                let _ = fs::remove_file(&wal);
                let _ = fs::remove_file(&shm);
            }
            open_and_configure(&db_path)
                .map_err(|e| format!("Database open failed after retry: {e}"))?
        }
    };

    run_migrations(&conn)?;

    info!("Database initialized (schema v{CURRENT_SCHEMA_VERSION})");

    Ok(DbState {
        conn: Mutex::new(conn),
        db_path,
    })
}

/// Open the database file and apply pragmas.
fn open_and_configure(path: &Path) -> Result<Connection, String> {
    let conn = Connection::open(path).map_err(|e| format!("sqlite open: {e}"))?;

    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )
    .map_err(|e| format!("pragma setup: {e}"))?;

    Ok(conn)
}

/// Run all pending migrations up to `CURRENT_SCHEMA_VERSION`.
fn run_migrations(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT DEFAULT (datetime('now'))
        );",
    )
    .map_err(|e| format!("create schema_version: {e}"))?;

    let current: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current >= CURRENT_SCHEMA_VERSION {
        info!("Database schema up to date (v{current})");
        return Ok(());
    }

    info!("Migrating database from v{current} to v{CURRENT_SCHEMA_VERSION}");

    if current < 1 {
        migrate_v1(conn)?;
    }
    if current < 2 {
        migrate_v2(conn)?;
    }
    if current < 3 {
        migrate_v3(conn)?;
    }

    Ok(())
}

/// Migration v1: settings store.
fn migrate_v1(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "
        -- local_settings (category/key/value store)
        CREATE TABLE IF NOT EXISTS local_settings (
            id TEXT PRIMARY KEY DEFAULT (lower(hex(randomblob(16)))),
            setting_category TEXT NOT NULL,
            setting_key TEXT NOT NULL,
            setting_value TEXT NOT NULL,
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now')),
            UNIQUE(setting_category, setting_key)
        );

        INSERT INTO schema_version (version) VALUES (1);
        ",
    )
    .map_err(|e| format!("migrate v1: {e}"))?;
    Ok(())
}

/// Migration v2: pedido snapshot cache.
fn migrate_v2(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS pedido_cache (
            id TEXT PRIMARY KEY,
            id_seguimiento TEXT,
            estado TEXT NOT NULL DEFAULT 'solicitud',
            payload TEXT NOT NULL DEFAULT '{}',
            fetched_at TEXT DEFAULT (datetime('now'))
        );

        INSERT INTO schema_version (version) VALUES (2);
        ",
    )
    .map_err(|e| format!("migrate v2: {e}"))?;
    Ok(())
}

/// Migration v3: lookup indexes for the tracking view and the stage panels.
fn migrate_v3(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "
        CREATE INDEX IF NOT EXISTS idx_pedido_cache_seguimiento
            ON pedido_cache (id_seguimiento);
        CREATE INDEX IF NOT EXISTS idx_pedido_cache_estado
            ON pedido_cache (estado);

        INSERT INTO schema_version (version) VALUES (3);
        ",
    )
    .map_err(|e| format!("migrate v3: {e}"))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Settings helpers
// ---------------------------------------------------------------------------

pub fn get_setting(conn: &Connection, category: &str, key: &str) -> Option<String> {
    conn.query_row(
        "SELECT setting_value FROM local_settings WHERE setting_category = ?1 AND setting_key = ?2",
        params![category, key],
        |row| row.get(0),
    )
    .ok()
}

pub fn set_setting(
    conn: &Connection,
    category: &str,
    key: &str,
    value: &str,
) -> Result<(), String> {
    conn.execute(
        "INSERT INTO local_settings (setting_category, setting_key, setting_value, updated_at)
         VALUES (?1, ?2, ?3, datetime('now'))
         ON CONFLICT(setting_category, setting_key) DO UPDATE SET
            setting_value = excluded.setting_value,
            updated_at = excluded.updated_at",
        params![category, key, value],
    )
    .map_err(|e| format!("set_setting: {e}"))?;
    Ok(())
}

pub fn delete_all_settings(conn: &Connection, category: &str) -> Result<(), String> {
    conn.execute(
        "DELETE FROM local_settings WHERE setting_category = ?1",
        params![category],
    )
    .map_err(|e| format!("delete_all_settings: {e}"))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Pedido snapshot cache
// ---------------------------------------------------------------------------

/// Store (or refresh) the cached snapshot of a fetched pedido.
pub fn cache_pedido(conn: &Connection, pedido: &serde_json::Value) -> Result<(), String> {
    let id = pedido
        .get("id")
        .and_then(value_as_id)
        .ok_or("cache_pedido: snapshot is missing an id")?;
    let seguimiento = pedido
        .get("id_seguimiento")
        .or_else(|| pedido.get("idSeguimiento"))
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    let estado = pedido
        .get("estado")
        .and_then(|v| v.as_str())
        .unwrap_or("solicitud");

    conn.execute(
        "INSERT INTO pedido_cache (id, id_seguimiento, estado, payload, fetched_at)
         VALUES (?1, ?2, ?3, ?4, datetime('now'))
         ON CONFLICT(id) DO UPDATE SET
            id_seguimiento = excluded.id_seguimiento,
            estado = excluded.estado,
            payload = excluded.payload,
            fetched_at = excluded.fetched_at",
        params![id, seguimiento, estado, pedido.to_string()],
    )
    .map_err(|e| format!("cache_pedido: {e}"))?;
    Ok(())
}

/// Read a cached pedido snapshot by id or tracking UUID.
pub fn cached_pedido(conn: &Connection, id_or_seguimiento: &str) -> Option<serde_json::Value> {
    let raw: String = conn
        .query_row(
            "SELECT payload FROM pedido_cache WHERE id = ?1 OR id_seguimiento = ?1 LIMIT 1",
            params![id_or_seguimiento],
            |row| row.get(0),
        )
        .ok()?;
    serde_json::from_str(&raw).ok()
}

fn value_as_id(v: &serde_json::Value) -> Option<String> {
    match v {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Health / stats
// ---------------------------------------------------------------------------

/// Row counts and file size, shown on the diagnostics screen.
pub fn stats(db: &DbState) -> Result<serde_json::Value, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let schema_version: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .map_err(|e| e.to_string())?;
    let settings: i64 = conn
        .query_row("SELECT COUNT(*) FROM local_settings", [], |row| row.get(0))
        .unwrap_or(0);
    let cached: i64 = conn
        .query_row("SELECT COUNT(*) FROM pedido_cache", [], |row| row.get(0))
        .unwrap_or(0);
    let size_bytes = fs::metadata(&db.db_path).map(|m| m.len()).unwrap_or(0);

    Ok(serde_json::json!({
        "schemaVersion": schema_version,
        "settingsRows": settings,
        "cachedPedidos": cached,
        "sizeBytes": size_bytes,
        "path": db.db_path.display().to_string(),
    }))
}

/// Cheap liveness probe for the diagnostics screen.
pub fn health_check(db: &DbState) -> Result<serde_json::Value, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let ok: i32 = conn
        .query_row("SELECT 1", [], |row| row.get(0))
        .map_err(|e| format!("health check: {e}"))?;
    Ok(serde_json::json!({ "healthy": ok == 1 }))
}

#[cfg(test)]
pub fn run_migrations_for_test(conn: &Connection) {
    run_migrations(conn).expect("run_migrations should succeed in test");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        run_migrations_for_test(&conn);
        conn
    }

    #[test]
    fn settings_roundtrip_and_overwrite() {
        let conn = test_conn();
        set_setting(&conn, "ui", "page_size", "10").unwrap();
        assert_eq!(get_setting(&conn, "ui", "page_size").as_deref(), Some("10"));
        set_setting(&conn, "ui", "page_size", "25").unwrap();
        assert_eq!(get_setting(&conn, "ui", "page_size").as_deref(), Some("25"));
        assert_eq!(get_setting(&conn, "ui", "missing"), None);
    }

    #[test]
    fn pedido_cache_roundtrip_by_id_and_tracking_uuid() {
        let conn = test_conn();
        let pedido = serde_json::json!({
            "id": 42,
            "id_seguimiento": "3fa85f64-5717-4562-b3fc-2c963f66afa6",
            "estado": "cotizado",
            "items": [{ "descripcion": "Válvula", "cantidad": 2 }],
        });
        cache_pedido(&conn, &pedido).unwrap();

        let by_id = cached_pedido(&conn, "42").expect("cached by id");
        assert_eq!(by_id["estado"], "cotizado");

        let by_tracking = cached_pedido(&conn, "3fa85f64-5717-4562-b3fc-2c963f66afa6")
            .expect("cached by tracking uuid");
        assert_eq!(by_tracking["items"][0]["cantidad"], 2);
    }

    #[test]
    fn cache_pedido_refreshes_existing_snapshot() {
        let conn = test_conn();
        cache_pedido(
            &conn,
            &serde_json::json!({ "id": "p-1", "estado": "solicitud" }),
        )
        .unwrap();
        cache_pedido(
            &conn,
            &serde_json::json!({ "id": "p-1", "estado": "cotizado" }),
        )
        .unwrap();
        let snap = cached_pedido(&conn, "p-1").unwrap();
        assert_eq!(snap["estado"], "cotizado");
        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM pedido_cache", [], |r| r.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn cache_pedido_requires_an_id() {
        let conn = test_conn();
        let err = cache_pedido(&conn, &serde_json::json!({ "estado": "cotizado" })).unwrap_err();
        assert!(err.contains("missing an id"));
    }
}
