//! Secure credential storage using the OS credential store.
//!
//! Holds the backend base URL and the JWT pair issued at login. On Windows
//! this uses DPAPI (via the `keyring` crate), on macOS Keychain, and on
//! Linux the Secret Service API. Tokens never land in a flat file.
//!
//! The original web client wrote the access token under two different
//! localStorage keys depending on the code path. Here there is exactly one
//! canonical key per credential; every reader and writer goes through the
//! constants below.

use keyring::Entry;
use tracing::{info, warn};
use zeroize::Zeroizing;

const SERVICE_NAME: &str = "clarotec";

// Credential keys
pub const KEY_API_BASE_URL: &str = "api_base_url";
pub const KEY_ACCESS_TOKEN: &str = "access_token";
pub const KEY_REFRESH_TOKEN: &str = "refresh_token";

/// All credential keys managed by this module.
const ALL_KEYS: &[&str] = &[KEY_API_BASE_URL, KEY_ACCESS_TOKEN, KEY_REFRESH_TOKEN];

// ---------------------------------------------------------------------------
// Low-level helpers
// ---------------------------------------------------------------------------

/// Retrieve a single credential from the OS keyring. Returns `None` when the
/// entry does not exist (or the platform returns a "not found" error).
pub fn get_credential(key: &str) -> Option<String> {
    let entry = match Entry::new(SERVICE_NAME, key) {
        Ok(e) => e,
        Err(e) => {
            warn!(key, error = %e, "keyring: failed to create entry");
            return None;
        }
    };
    match entry.get_password() {
        Ok(pw) => Some(pw),
        Err(keyring::Error::NoEntry) => None,
        Err(e) => {
            warn!(key, error = %e, "keyring: failed to read credential");
            None
        }
    }
}

/// Store a credential in the OS keyring.
pub fn set_credential(key: &str, value: &str) -> Result<(), String> {
    let entry = Entry::new(SERVICE_NAME, key).map_err(|e| e.to_string())?;
    entry.set_password(value).map_err(|e| e.to_string())?;
    Ok(())
}

/// Delete a credential from the OS keyring. Silently succeeds if the entry
/// does not exist.
pub fn delete_credential(key: &str) -> Result<(), String> {
    let entry = Entry::new(SERVICE_NAME, key).map_err(|e| e.to_string())?;
    match entry.delete_credential() {
        Ok(()) => Ok(()),
        Err(keyring::Error::NoEntry) => Ok(()),
        Err(e) => Err(e.to_string()),
    }
}

pub fn has_credential(key: &str) -> bool {
    get_credential(key).is_some()
}

// ---------------------------------------------------------------------------
// High-level API
// ---------------------------------------------------------------------------

/// A persisted token pair. Wrapped in `Zeroizing` so the plaintext is wiped
/// when the pair goes out of scope.
pub struct SavedTokens {
    pub access: Zeroizing<String>,
    pub refresh: Option<Zeroizing<String>>,
}

/// Read the persisted token pair, if any.
pub fn load_tokens() -> Option<SavedTokens> {
    let access = get_credential(KEY_ACCESS_TOKEN)?;
    let refresh = get_credential(KEY_REFRESH_TOKEN);
    Some(SavedTokens {
        access: Zeroizing::new(access),
        refresh: refresh.map(Zeroizing::new),
    })
}

/// Persist a token pair issued by login or refresh.
pub fn save_tokens(access: &str, refresh: Option<&str>) -> Result<(), String> {
    set_credential(KEY_ACCESS_TOKEN, access)?;
    if let Some(refresh) = refresh {
        set_credential(KEY_REFRESH_TOKEN, refresh)?;
    }
    Ok(())
}

/// Remove both tokens. Used by logout and by the interceptor when a refresh
/// attempt fails.
pub fn clear_tokens() {
    for key in [KEY_ACCESS_TOKEN, KEY_REFRESH_TOKEN] {
        if let Err(e) = delete_credential(key) {
            warn!(key, error = %e, "keyring: failed to delete token");
        }
    }
}

/// The client is configured once a backend base URL is stored.
pub fn is_configured() -> bool {
    has_credential(KEY_API_BASE_URL)
}

/// Delete every stored credential (factory reset).
pub fn factory_reset() -> Result<(), String> {
    info!("performing factory reset, deleting all credentials");
    for key in ALL_KEYS {
        delete_credential(key)?;
    }
    Ok(())
}
