//! Quotation pricing arithmetic.
//!
//! Single source of truth for every total shown to staff or clients. The
//! original web client duplicated this formula across three pages; here
//! every editor, panel, and submission path goes through this module.
//!
//! All money is CLP, which has no minor unit, so amounts are plain `i64`
//! pesos and every fractional intermediate is rounded half-away-from-zero.

use serde::{Deserialize, Serialize};

/// Fixed Chilean VAT rate. Not configurable by design.
pub const IVA_RATE: f64 = 0.19;

/// A priced line as stored on a pedido (staff side). `precio_compra` is the
/// purchase cost, tracked separately from the sale price to derive margin.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineaPedido {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub descripcion: String,
    #[serde(default)]
    pub cantidad: i64,
    #[serde(default, alias = "precio_unitario")]
    pub precio_unitario: i64,
    #[serde(default, alias = "precio_compra")]
    pub precio_compra: i64,
}

/// Full price breakdown for a quotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Desglose {
    pub subtotal: i64,
    pub recargo: i64,
    pub neto: i64,
    pub iva: i64,
    pub costo_envio: i64,
    pub total: i64,
}

fn round_clp(value: f64) -> i64 {
    value.round() as i64
}

/// Compute the quotation breakdown, in order:
/// subtotal, urgency surcharge, neto, IVA (19% of neto), total.
pub fn quote_totals(items: &[LineaPedido], porcentaje_urgencia: f64, costo_envio: i64) -> Desglose {
    let subtotal: i64 = items
        .iter()
        .map(|l| l.cantidad.max(0) * l.precio_unitario.max(0))
        .sum();
    let recargo = round_clp(subtotal as f64 * (porcentaje_urgencia / 100.0));
    let neto = subtotal + recargo;
    let iva = round_clp(neto as f64 * IVA_RATE);
    Desglose {
        subtotal,
        recargo,
        neto,
        iva,
        costo_envio,
        total: neto + iva + costo_envio,
    }
}

/// Estimated gross profit and margin over the net sale amount.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumenMargen {
    pub costo_total: i64,
    pub ganancia_estimada: i64,
    pub margen_porcentaje: f64,
}

/// Margin over `neto`. Guarded: margin is 0 when neto is 0.
pub fn margin_summary(items: &[LineaPedido], neto: i64) -> ResumenMargen {
    let costo_total: i64 = items
        .iter()
        .map(|l| l.cantidad.max(0) * l.precio_compra.max(0))
        .sum();
    let ganancia_estimada = neto - costo_total;
    let margen_porcentaje = if neto == 0 {
        0.0
    } else {
        ganancia_estimada as f64 / neto as f64 * 100.0
    };
    ResumenMargen {
        costo_total,
        ganancia_estimada,
        margen_porcentaje,
    }
}

/// Back-calculate a sale price from a purchase cost and a target margin.
///
/// `None` for margins outside `0 <= m < 100`: a 100% margin would imply an
/// infinite price, so the caller leaves the line unchanged.
pub fn price_for_margin(precio_compra: i64, margen: f64) -> Option<i64> {
    if !(0.0..100.0).contains(&margen) {
        return None;
    }
    Some(round_clp(precio_compra as f64 / (1.0 - margen / 100.0)))
}

/// Format an amount as Chilean pesos: `$1.234.567`.
pub fn format_clp(amount: i64) -> String {
    let negative = amount < 0;
    let digits = amount.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3 + 2);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(c);
    }
    if negative {
        format!("-${grouped}")
    } else {
        format!("${grouped}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linea(cantidad: i64, precio_unitario: i64, precio_compra: i64) -> LineaPedido {
        LineaPedido {
            id: None,
            descripcion: "item".into(),
            cantidad,
            precio_unitario,
            precio_compra,
        }
    }

    #[test]
    fn quote_totals_with_urgency_and_shipping() {
        let items = vec![linea(2, 1000, 0)];
        let d = quote_totals(&items, 10.0, 500);
        assert_eq!(d.subtotal, 2000);
        assert_eq!(d.recargo, 200);
        assert_eq!(d.neto, 2200);
        assert_eq!(d.iva, 418);
        assert_eq!(d.total, 3118);
    }

    #[test]
    fn quote_totals_without_surcharge() {
        let items = vec![linea(1, 10_000, 0), linea(3, 2500, 0)];
        let d = quote_totals(&items, 0.0, 0);
        assert_eq!(d.subtotal, 17_500);
        assert_eq!(d.recargo, 0);
        assert_eq!(d.neto, 17_500);
        assert_eq!(d.iva, 3325);
        assert_eq!(d.total, 20_825);
    }

    #[test]
    fn margin_summary_basic() {
        let items = vec![linea(2, 1000, 600)];
        let d = quote_totals(&items, 0.0, 0);
        let m = margin_summary(&items, d.neto);
        assert_eq!(m.costo_total, 1200);
        assert_eq!(m.ganancia_estimada, 800);
        assert!((m.margen_porcentaje - 40.0).abs() < f64::EPSILON);
    }

    #[test]
    fn margin_summary_zero_neto_guard() {
        let m = margin_summary(&[], 0);
        assert_eq!(m.ganancia_estimada, 0);
        assert_eq!(m.margen_porcentaje, 0.0);
    }

    #[test]
    fn price_for_margin_back_calculation() {
        assert_eq!(price_for_margin(5000, 20.0), Some(6250));
        assert_eq!(price_for_margin(5000, 0.0), Some(5000));
        // round(7990 / 0.65)
        assert_eq!(price_for_margin(7990, 35.0), Some(12_292));
    }

    #[test]
    fn price_for_margin_rejects_impossible_margins() {
        assert_eq!(price_for_margin(5000, 100.0), None);
        assert_eq!(price_for_margin(5000, 150.0), None);
        assert_eq!(price_for_margin(5000, -5.0), None);
    }

    #[test]
    fn format_clp_groups_thousands() {
        assert_eq!(format_clp(0), "$0");
        assert_eq!(format_clp(950), "$950");
        assert_eq!(format_clp(3118), "$3.118");
        assert_eq!(format_clp(1_234_567), "$1.234.567");
        assert_eq!(format_clp(-45_000), "-$45.000");
    }
}
