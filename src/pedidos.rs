//! Pedido (quotation/order) lifecycle.
//!
//! The backend owns every pedido; this module only models the client-visible
//! state machine so views and commands agree on what each stage permits.
//! `rechazado` and `completado` are terminal. The client-side guards here
//! run before any network call; notably, accepting a quotation with
//! shipping options present requires one to be selected first.

use serde_json::Value;
use std::collections::BTreeMap;

/// Server-owned order states, in lifecycle order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Estado {
    Solicitud,
    Cotizado,
    Aceptado,
    Rechazado,
    PagoConfirmado,
    Despachado,
    Completado,
}

impl Estado {
    pub fn as_str(&self) -> &'static str {
        match self {
            Estado::Solicitud => "solicitud",
            Estado::Cotizado => "cotizado",
            Estado::Aceptado => "aceptado",
            Estado::Rechazado => "rechazado",
            Estado::PagoConfirmado => "pago_confirmado",
            Estado::Despachado => "despachado",
            Estado::Completado => "completado",
        }
    }

    pub fn parse(raw: &str) -> Option<Estado> {
        match raw.trim().to_lowercase().as_str() {
            "solicitud" => Some(Estado::Solicitud),
            "cotizado" => Some(Estado::Cotizado),
            "aceptado" => Some(Estado::Aceptado),
            "rechazado" => Some(Estado::Rechazado),
            "pago_confirmado" | "pago-confirmado" => Some(Estado::PagoConfirmado),
            "despachado" => Some(Estado::Despachado),
            "completado" => Some(Estado::Completado),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Estado::Rechazado | Estado::Completado)
    }

    /// Transitions the client may observe from the server.
    pub fn can_transition_to(&self, next: Estado) -> bool {
        matches!(
            (self, next),
            (Estado::Solicitud, Estado::Cotizado)
                | (Estado::Cotizado, Estado::Aceptado)
                | (Estado::Cotizado, Estado::Rechazado)
                | (Estado::Aceptado, Estado::PagoConfirmado)
                | (Estado::PagoConfirmado, Estado::Despachado)
                | (Estado::Despachado, Estado::Completado)
        )
    }

    /// Actions offered to the *client* (tracking view) in this state. All
    /// other states render an informational message only.
    pub fn client_actions(&self, has_shipping_options: bool) -> &'static [&'static str] {
        match self {
            Estado::Cotizado if has_shipping_options => {
                &["seleccionar-envio", "aceptar", "rechazar"]
            }
            Estado::Cotizado => &["aceptar", "rechazar"],
            Estado::Despachado => &["confirmar-recepcion"],
            _ => &[],
        }
    }
}

/// Shipping options as served by the backend: `{method: cost}`.
pub fn parse_shipping_options(pedido: &Value) -> BTreeMap<String, i64> {
    let mut options = BTreeMap::new();
    if let Some(Value::Object(map)) = pedido
        .get("opciones_envio")
        .or_else(|| pedido.get("opcionesEnvio"))
    {
        for (method, cost) in map {
            if let Some(cost) = cost.as_i64().or_else(|| cost.as_f64().map(|f| f.round() as i64)) {
                options.insert(method.clone(), cost);
            }
        }
    }
    options
}

/// Currently selected shipping method, if any.
pub fn selected_shipping(pedido: &Value) -> Option<String> {
    pedido
        .get("metodo_envio")
        .or_else(|| pedido.get("metodoEnvio"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Client-side guard for `aceptar`, evaluated before any network call.
pub fn validate_accept(pedido: &Value) -> Result<(), String> {
    let estado = pedido
        .get("estado")
        .and_then(Value::as_str)
        .and_then(Estado::parse)
        .ok_or("El pedido no tiene un estado válido")?;
    if estado != Estado::Cotizado {
        return Err(format!(
            "Solo una cotización puede aceptarse (estado actual: {})",
            estado.as_str()
        ));
    }
    let options = parse_shipping_options(pedido);
    if !options.is_empty() && selected_shipping(pedido).is_none() {
        return Err("Debe seleccionar un método de envío antes de aceptar".into());
    }
    Ok(())
}

/// Guard for the client receipt confirmation.
pub fn validate_confirm_receipt(pedido: &Value) -> Result<(), String> {
    let estado = pedido
        .get("estado")
        .and_then(Value::as_str)
        .and_then(Estado::parse)
        .ok_or("El pedido no tiene un estado válido")?;
    if estado != Estado::Despachado {
        return Err("Solo un pedido despachado puede confirmarse como recibido".into());
    }
    Ok(())
}

/// Panel tabs in the admin list views, mapped to the estado filter each
/// endpoint expects.
pub fn stage_filter(stage: &str) -> Option<&'static str> {
    match stage.trim().to_lowercase().as_str() {
        "pendientes" | "solicitudes" => Some("solicitud"),
        "cotizados" => Some("cotizado"),
        "aceptados" => Some("aceptado"),
        "pagados" => Some("pago_confirmado"),
        "despachados" => Some("despachado"),
        "completados" => Some("completado"),
        "rechazados" => Some("rechazado"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_transitions() {
        use Estado::*;
        assert!(Solicitud.can_transition_to(Cotizado));
        assert!(Cotizado.can_transition_to(Aceptado));
        assert!(Cotizado.can_transition_to(Rechazado));
        assert!(Aceptado.can_transition_to(PagoConfirmado));
        assert!(PagoConfirmado.can_transition_to(Despachado));
        assert!(Despachado.can_transition_to(Completado));

        assert!(!Solicitud.can_transition_to(Aceptado));
        assert!(!Rechazado.can_transition_to(Cotizado));
        assert!(!Completado.can_transition_to(Solicitud));
    }

    #[test]
    fn terminal_states() {
        assert!(Estado::Rechazado.is_terminal());
        assert!(Estado::Completado.is_terminal());
        assert!(!Estado::Despachado.is_terminal());
    }

    #[test]
    fn parse_roundtrip() {
        for estado in [
            Estado::Solicitud,
            Estado::Cotizado,
            Estado::Aceptado,
            Estado::Rechazado,
            Estado::PagoConfirmado,
            Estado::Despachado,
            Estado::Completado,
        ] {
            assert_eq!(Estado::parse(estado.as_str()), Some(estado));
        }
        assert_eq!(Estado::parse("PAGO-CONFIRMADO"), Some(Estado::PagoConfirmado));
        assert_eq!(Estado::parse("enviado"), None);
    }

    #[test]
    fn client_actions_per_state() {
        assert_eq!(
            Estado::Cotizado.client_actions(true),
            &["seleccionar-envio", "aceptar", "rechazar"]
        );
        assert_eq!(Estado::Cotizado.client_actions(false), &["aceptar", "rechazar"]);
        assert_eq!(Estado::Despachado.client_actions(false), &["confirmar-recepcion"]);
        assert!(Estado::Solicitud.client_actions(true).is_empty());
        assert!(Estado::Completado.client_actions(false).is_empty());
    }

    #[test]
    fn accept_requires_shipping_selection_when_options_exist() {
        let pedido = serde_json::json!({
            "estado": "cotizado",
            "opciones_envio": { "retiro": 0, "courier": 4500 },
        });
        let err = validate_accept(&pedido).unwrap_err();
        assert!(err.contains("método de envío"));

        let with_selection = serde_json::json!({
            "estado": "cotizado",
            "opciones_envio": { "retiro": 0, "courier": 4500 },
            "metodo_envio": "courier",
        });
        assert!(validate_accept(&with_selection).is_ok());
    }

    #[test]
    fn accept_without_options_needs_no_selection() {
        let pedido = serde_json::json!({ "estado": "cotizado" });
        assert!(validate_accept(&pedido).is_ok());
    }

    #[test]
    fn accept_is_rejected_outside_cotizado() {
        let pedido = serde_json::json!({ "estado": "despachado" });
        assert!(validate_accept(&pedido).is_err());
        let pedido = serde_json::json!({ "estado": "???" });
        assert!(validate_accept(&pedido).is_err());
    }

    #[test]
    fn shipping_options_parse_numeric_costs() {
        let pedido = serde_json::json!({
            "opcionesEnvio": { "courier": 4500.0, "retiro": 0, "malo": "gratis" },
        });
        let options = parse_shipping_options(&pedido);
        assert_eq!(options.get("courier"), Some(&4500));
        assert_eq!(options.get("retiro"), Some(&0));
        assert!(!options.contains_key("malo"));
    }

    #[test]
    fn stage_filters_map_to_estados() {
        assert_eq!(stage_filter("pendientes"), Some("solicitud"));
        assert_eq!(stage_filter("Cotizados"), Some("cotizado"));
        assert_eq!(stage_filter("otros"), None);
    }
}
