//! Clarotec desktop client - Tauri v2 backend.
//!
//! Registers the IPC command handlers the webview frontend calls via
//! `@tauri-apps/api/core::invoke()`. The Rust side owns the session, the
//! cart, the local SQLite cache, and the REST client; the webview renders.

use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod api;
mod cart;
mod commands;
mod db;
mod diagnostics;
mod helpers;
mod listing;
mod pedidos;
mod pricing;
mod session;
mod storage;

const EXTERNAL_URL_MAX_LEN: usize = 2048;
const ALLOWED_EXTERNAL_HOSTS: &[&str] = &[
    "clarotec.cl",
    "www.clarotec.cl",
    "api.clarotec.cl",
    "docs.clarotec.cl",
];
const ALLOWED_EXTERNAL_HOST_SUFFIXES: &[&str] = &[".clarotec.cl"];

pub(crate) fn value_str(v: &serde_json::Value, keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Some(s) = v.get(*key).and_then(|x| x.as_str()) {
            let trimmed = s.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

pub(crate) fn value_f64(v: &serde_json::Value, keys: &[&str]) -> Option<f64> {
    for key in keys {
        if let Some(n) = v.get(*key).and_then(|x| x.as_f64()) {
            return Some(n);
        }
    }
    None
}

pub fn run() {
    // Structured logging: console + rolling daily file
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,clarotec_lib=debug"));

    diagnostics::prune_old_logs();

    let log_dir = diagnostics::get_log_dir();
    std::fs::create_dir_all(&log_dir).ok();

    let file_appender = tracing_appender::rolling::daily(&log_dir, "clarotec");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);
    let console_layer = fmt::layer().with_target(true);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    // The guard flushes on drop; the app runs until process exit, so leak it.
    std::mem::forget(_guard);

    info!("Starting Clarotec v{}", env!("CARGO_PKG_VERSION"));

    tauri::Builder::default()
        .setup(|app| {
            use tauri::{Emitter, Manager};

            let app_data_dir = app
                .path()
                .app_data_dir()
                .expect("Failed to get app data dir");

            let db_state = db::init(&app_data_dir).expect("Failed to initialize database");

            // Cart is rehydrated from the local store before the first command.
            app.manage(cart::CartState::load(&db_state));
            app.manage(db_state);
            app.manage(session::SessionState::new());
            app.manage(api::ApiState::new(storage::get_credential(
                storage::KEY_API_BASE_URL,
            )));

            // Hydrate the session from persisted tokens in the background;
            // session_get reports `loading` until this lands.
            let startup_app = app.handle().clone();
            tauri::async_runtime::spawn(async move {
                let snapshot = commands::session::bootstrap_and_apply(&startup_app).await;
                let _ = startup_app.emit("session_bootstrapped", snapshot);
            });

            info!("Database, session, cart, and API client registered");
            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            // Session
            commands::session::session_bootstrap,
            commands::session::session_get,
            commands::session::session_login,
            commands::session::session_logout,
            commands::session::session_register,
            commands::session::profile_get,
            commands::session::profile_update,
            // Cart + public request flow
            commands::cart::cart_get,
            commands::cart::cart_item_count,
            commands::cart::cart_add_item,
            commands::cart::cart_update_item,
            commands::cart::cart_remove_item,
            commands::cart::cart_clear,
            commands::cart::cart_submit_request,
            // Pedidos
            commands::pedidos::pedidos_list,
            commands::pedidos::pedido_get,
            commands::pedidos::pedido_track,
            commands::pedidos::pedido_update_items,
            commands::pedidos::pedido_apply_margin,
            commands::pedidos::pedido_quote,
            commands::pedidos::pedido_shipping_quote,
            commands::pedidos::pedido_select_shipping,
            commands::pedidos::pedido_accept_client,
            commands::pedidos::pedido_reject_client,
            commands::pedidos::pedido_confirm_receipt,
            commands::pedidos::pedido_accept,
            commands::pedidos::pedido_reject,
            commands::pedidos::pedido_confirm_payment,
            commands::pedidos::pedido_reject_payment,
            commands::pedidos::pedido_mark_dispatched,
            commands::pedidos::pedido_send_email,
            commands::pedidos::pedido_open_pdf,
            // Catalogue
            commands::catalog::product_list,
            commands::catalog::product_create,
            commands::catalog::product_update,
            commands::catalog::product_delete,
            commands::catalog::products_sync_from_orders,
            commands::catalog::client_list,
            commands::catalog::client_create,
            commands::catalog::client_update,
            // Analytics + retention
            commands::analytics::analytics_rentability,
            commands::analytics::analytics_kpis,
            commands::analytics::analytics_dashboard,
            commands::analytics::retention_summary,
            commands::analytics::retention_mark_contacted,
            commands::analytics::retention_set_status,
            // Settings
            commands::settings::settings_get_api_url,
            commands::settings::settings_set_api_url,
            commands::settings::settings_is_configured,
            commands::settings::settings_get_local,
            commands::settings::settings_set_local,
            commands::settings::settings_factory_reset,
            // Diagnostics
            commands::diagnostics::diagnostics_get_about,
            commands::diagnostics::diagnostics_get_system_health,
            commands::diagnostics::database_health_check,
            commands::diagnostics::database_get_stats,
        ])
        .run(tauri::generate_context!())
        .expect("error while running Clarotec");
}
