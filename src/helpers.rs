use reqwest::Url;

use crate::{db, value_str, ALLOWED_EXTERNAL_HOSTS, ALLOWED_EXTERNAL_HOST_SUFFIXES, EXTERNAL_URL_MAX_LEN};

pub(crate) fn read_local_json(db: &db::DbState, key: &str) -> Result<serde_json::Value, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let raw = db::get_setting(&conn, "local", key);
    if let Some(raw) = raw {
        if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(&raw) {
            return Ok(parsed);
        }
    }
    Ok(serde_json::Value::Null)
}

pub(crate) fn write_local_json(
    db: &db::DbState,
    key: &str,
    value: &serde_json::Value,
) -> Result<(), String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    db::set_setting(&conn, "local", key, &value.to_string())
}

/// Frontend payloads arrive either as a bare string or as an object with one
/// of several historical key spellings.
pub(crate) fn payload_arg0_as_string(
    arg0: Option<serde_json::Value>,
    keys: &[&str],
) -> Option<String> {
    match arg0 {
        Some(serde_json::Value::String(s)) => {
            let t = s.trim();
            if t.is_empty() {
                None
            } else {
                Some(t.to_string())
            }
        }
        Some(serde_json::Value::Object(obj)) => {
            let payload = serde_json::Value::Object(obj);
            value_str(&payload, keys)
        }
        _ => None,
    }
}

pub(crate) fn normalize_phone(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_ascii_digit())
        .collect::<String>()
}

/// Contact block required before a request can be submitted.
pub(crate) fn validate_contacto(payload: &serde_json::Value) -> Result<(), String> {
    let nombre = value_str(payload, &["nombre", "name"]);
    if nombre.is_none() {
        return Err("El nombre de contacto es obligatorio".into());
    }
    let email = value_str(payload, &["email", "correo"]).unwrap_or_default();
    let at = email.find('@');
    let valid_email = match at {
        Some(pos) => pos > 0 && email[pos + 1..].contains('.'),
        None => false,
    };
    if !valid_email {
        return Err("El correo electrónico no es válido".into());
    }
    let telefono = value_str(payload, &["telefono", "phone"]).unwrap_or_default();
    if normalize_phone(&telefono).len() < 8 {
        return Err("El teléfono debe tener al menos 8 dígitos".into());
    }
    Ok(())
}

pub(crate) fn validate_external_url(
    url_raw: &str,
    db: Option<&db::DbState>,
) -> Result<Url, String> {
    let trimmed = url_raw.trim();
    if trimmed.is_empty() {
        return Err("External URL cannot be empty".into());
    }
    if trimmed.len() > EXTERNAL_URL_MAX_LEN {
        return Err("External URL is too long".into());
    }

    let parsed = Url::parse(trimmed).map_err(|e| format!("Invalid external URL: {e}"))?;
    let scheme = parsed.scheme().to_ascii_lowercase();
    if scheme != "https" && scheme != "http" {
        return Err("Only http/https URLs are allowed".into());
    }
    if !parsed.username().is_empty() || parsed.password().is_some() {
        return Err("Credentialed URLs are not allowed".into());
    }

    let host = parsed
        .host_str()
        .ok_or("External URL is missing a host")?
        .to_ascii_lowercase();
    let localhost_http = scheme == "http" && matches!(host.as_str(), "localhost" | "127.0.0.1");

    if !localhost_http {
        let mut custom_hosts: Vec<String> = Vec::new();
        if let Some(db_state) = db {
            if let Ok(conn) = db_state.conn.lock() {
                let raw = db::get_setting(&conn, "security", "allowed_external_hosts")
                    .unwrap_or_default();
                if let Ok(arr) = serde_json::from_str::<Vec<String>>(&raw) {
                    custom_hosts = arr
                        .into_iter()
                        .map(|s| s.trim().to_ascii_lowercase())
                        .filter(|s| !s.is_empty())
                        .collect();
                } else if !raw.trim().is_empty() {
                    custom_hosts = raw
                        .split(',')
                        .map(|s| s.trim().to_ascii_lowercase())
                        .filter(|s| !s.is_empty())
                        .collect();
                }
            }
        }

        let exact_allowed =
            ALLOWED_EXTERNAL_HOSTS.iter().any(|h| host == *h) || custom_hosts.contains(&host);
        let suffix_allowed = ALLOWED_EXTERNAL_HOST_SUFFIXES
            .iter()
            .any(|suffix| host.ends_with(suffix))
            || custom_hosts
                .iter()
                .any(|base| host.ends_with(&format!(".{base}")));
        if !exact_allowed && !suffix_allowed {
            return Err(format!("External host is not allowlisted: {host}"));
        }
    }

    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_accepts_string_or_object() {
        assert_eq!(
            payload_arg0_as_string(Some(serde_json::json!("abc")), &["id"]),
            Some("abc".to_string())
        );
        assert_eq!(
            payload_arg0_as_string(Some(serde_json::json!({ "pedidoId": "42" })), &["pedidoId", "id"]),
            Some("42".to_string())
        );
        assert_eq!(payload_arg0_as_string(Some(serde_json::json!("  ")), &["id"]), None);
        assert_eq!(payload_arg0_as_string(None, &["id"]), None);
    }

    #[test]
    fn contact_validation() {
        let ok = serde_json::json!({
            "nombre": "Ana Soto",
            "email": "ana@empresa.cl",
            "telefono": "+56 9 1234 5678",
        });
        assert!(validate_contacto(&ok).is_ok());

        let bad_email = serde_json::json!({
            "nombre": "Ana",
            "email": "ana-empresa",
            "telefono": "912345678",
        });
        assert!(validate_contacto(&bad_email).is_err());

        let short_phone = serde_json::json!({
            "nombre": "Ana",
            "email": "ana@empresa.cl",
            "telefono": "123",
        });
        assert!(validate_contacto(&short_phone).is_err());
    }

    #[test]
    fn external_url_allowlist() {
        assert!(validate_external_url("https://docs.clarotec.cl/pdf/abc.pdf", None).is_ok());
        assert!(validate_external_url("https://evil.example.com/x.pdf", None).is_err());
        assert!(validate_external_url("ftp://docs.clarotec.cl/x", None).is_err());
        assert!(validate_external_url("https://user:pw@docs.clarotec.cl/x", None).is_err());
        assert!(validate_external_url("http://localhost:3000/api/doc.pdf", None).is_ok());
    }
}
