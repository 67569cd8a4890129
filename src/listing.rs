//! Generic list-panel engine.
//!
//! Every admin table (solicitudes, cotizaciones, productos, clientes,
//! retención) is the same shape: fetch a collection, free-text filter over
//! a few fields, inclusive date-range filter on a timestamp, sort by a
//! configurable key, paginate with a fixed page size. The original client
//! re-implemented this per page; here each panel only supplies a
//! `PanelSpec` and the raw rows.

use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::Value;
use std::cmp::Ordering;

/// Fixed page size across every panel.
pub const PAGE_SIZE: usize = 10;

/// How a sortable column compares.
#[derive(Debug, Clone, Copy)]
pub enum SortKey {
    Text(&'static str),
    Number(&'static str),
    /// Lexicographic on the first 10 chars of an ISO timestamp.
    Date(&'static str),
    /// Concatenated "nombre apellido" comparator.
    FullName(&'static str, &'static str),
    /// Derived: length of a JSON array field.
    ItemCount(&'static str),
}

/// Static panel configuration.
pub struct PanelSpec {
    /// Fields matched by the free-text filter. A leading `/` selects a
    /// JSON pointer (nested field), anything else a top-level key.
    pub search_fields: &'static [&'static str],
    /// Timestamp field used by the date-range filter.
    pub date_field: &'static str,
    /// Sortable columns by name; the first entry is the default.
    pub sort_keys: &'static [(&'static str, SortKey)],
}

/// Query parameters sent by a panel.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    #[serde(default, alias = "buscar")]
    pub search: Option<String>,
    #[serde(default, alias = "desde")]
    pub date_from: Option<NaiveDate>,
    #[serde(default, alias = "hasta")]
    pub date_to: Option<NaiveDate>,
    #[serde(default, alias = "orden")]
    pub sort: Option<String>,
    #[serde(default = "default_ascending")]
    pub ascending: bool,
    #[serde(default = "default_page", alias = "pagina")]
    pub page: usize,
}

fn default_ascending() -> bool {
    true
}

fn default_page() -> usize {
    1
}

fn field<'a>(row: &'a Value, selector: &str) -> Option<&'a Value> {
    if selector.starts_with('/') {
        row.pointer(selector)
    } else {
        row.get(selector)
    }
}

fn field_text(row: &Value, selector: &str) -> String {
    match field(row, selector) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

fn matches_search(row: &Value, spec: &PanelSpec, needle: &str) -> bool {
    let needle = needle.to_lowercase();
    spec.search_fields
        .iter()
        .any(|f| field_text(row, f).to_lowercase().contains(&needle))
}

fn within_date_range(row: &Value, spec: &PanelSpec, query: &ListQuery) -> bool {
    if query.date_from.is_none() && query.date_to.is_none() {
        return true;
    }
    let ts = field_text(row, spec.date_field);
    if ts.len() < 10 {
        return false;
    }
    let day = &ts[..10];
    if let Some(from) = query.date_from {
        if day < from.format("%Y-%m-%d").to_string().as_str() {
            return false;
        }
    }
    if let Some(to) = query.date_to {
        if day > to.format("%Y-%m-%d").to_string().as_str() {
            return false;
        }
    }
    true
}

fn compare(a: &Value, b: &Value, key: SortKey) -> Ordering {
    match key {
        SortKey::Text(f) => field_text(a, f)
            .to_lowercase()
            .cmp(&field_text(b, f).to_lowercase()),
        SortKey::Date(f) => field_text(a, f).cmp(&field_text(b, f)),
        SortKey::Number(f) => {
            let na = field(a, f).and_then(Value::as_f64).unwrap_or(0.0);
            let nb = field(b, f).and_then(Value::as_f64).unwrap_or(0.0);
            na.partial_cmp(&nb).unwrap_or(Ordering::Equal)
        }
        SortKey::FullName(first, last) => {
            let fa = format!("{} {}", field_text(a, first), field_text(a, last)).to_lowercase();
            let fb = format!("{} {}", field_text(b, first), field_text(b, last)).to_lowercase();
            fa.cmp(&fb)
        }
        SortKey::ItemCount(f) => {
            let ca = field(a, f).and_then(Value::as_array).map_or(0, Vec::len);
            let cb = field(b, f).and_then(Value::as_array).map_or(0, Vec::len);
            ca.cmp(&cb)
        }
    }
}

fn resolve_sort_key(spec: &PanelSpec, query: &ListQuery) -> SortKey {
    let requested = query.sort.as_deref().unwrap_or_default();
    spec.sort_keys
        .iter()
        .find(|(name, _)| *name == requested)
        .or_else(|| spec.sort_keys.first())
        .map(|(_, key)| *key)
        .unwrap_or(SortKey::Text("id"))
}

/// Filter, sort, and paginate a fetched collection; returns the page plus
/// the pagination control model.
pub fn apply(rows: Vec<Value>, spec: &PanelSpec, query: &ListQuery) -> Value {
    let mut filtered: Vec<Value> = rows
        .into_iter()
        .filter(|row| {
            let by_search = match query.search.as_deref().map(str::trim) {
                Some(needle) if !needle.is_empty() => matches_search(row, spec, needle),
                _ => true,
            };
            by_search && within_date_range(row, spec, query)
        })
        .collect();

    let key = resolve_sort_key(spec, query);
    filtered.sort_by(|a, b| {
        let ord = compare(a, b, key);
        if query.ascending {
            ord
        } else {
            ord.reverse()
        }
    });

    let total = filtered.len();
    let total_pages = total.div_ceil(PAGE_SIZE).max(1);
    let page = query.page.clamp(1, total_pages);
    let start = (page - 1) * PAGE_SIZE;
    let items: Vec<Value> = filtered.into_iter().skip(start).take(PAGE_SIZE).collect();

    serde_json::json!({
        "items": items,
        "total": total,
        "pagina": page,
        "totalPaginas": total_pages,
        "paginacion": pagination_items(total_pages, page),
    })
}

// ---------------------------------------------------------------------------
// Pagination control model
// ---------------------------------------------------------------------------

/// One slot in the pagination control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageToken {
    Page(usize),
    Ellipsis,
}

/// Control model: always the first and last page, an ellipsis when the
/// current page is more than 2 away from an edge, and a sliding window of
/// up to 3 pages around the current one.
pub fn pagination_items(total_pages: usize, current: usize) -> Vec<Value> {
    let total_pages = total_pages.max(1);
    let current = current.clamp(1, total_pages);

    let mut tokens: Vec<PageToken> = vec![PageToken::Page(1)];
    if total_pages > 1 {
        let window_start = current.saturating_sub(1).max(2);
        let window_end = (current + 1).min(total_pages - 1);

        if window_start > 2 {
            tokens.push(PageToken::Ellipsis);
        }
        for page in window_start..=window_end {
            tokens.push(PageToken::Page(page));
        }
        if window_end + 1 < total_pages {
            tokens.push(PageToken::Ellipsis);
        }
        tokens.push(PageToken::Page(total_pages));
    }

    tokens
        .into_iter()
        .map(|t| match t {
            PageToken::Page(n) => Value::from(n),
            PageToken::Ellipsis => Value::from("…"),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPEC: PanelSpec = PanelSpec {
        search_fields: &["nombre", "/cliente/email", "referencia"],
        date_field: "created_at",
        sort_keys: &[
            ("fecha", SortKey::Date("created_at")),
            ("nombre", SortKey::FullName("nombre", "apellido")),
            ("total", SortKey::Number("total")),
            ("items", SortKey::ItemCount("items")),
        ],
    };

    fn row(nombre: &str, apellido: &str, day: u32, total: i64, items: usize) -> Value {
        serde_json::json!({
            "nombre": nombre,
            "apellido": apellido,
            "cliente": { "email": format!("{}@x.cl", nombre.to_lowercase()) },
            "referencia": "",
            "created_at": format!("2026-03-{day:02}T12:00:00Z"),
            "total": total,
            "items": vec![serde_json::json!({}); items],
        })
    }

    #[test]
    fn free_text_filter_matches_nested_fields_case_insensitively() {
        let rows = vec![row("Ana", "Soto", 1, 10, 1), row("Bruno", "Paz", 2, 20, 2)];
        let query = ListQuery {
            search: Some("BRUNO@X.CL".into()),
            ..Default::default()
        };
        let out = apply(rows, &SPEC, &query);
        assert_eq!(out["total"], 1);
        assert_eq!(out["items"][0]["nombre"], "Bruno");
    }

    #[test]
    fn date_range_filter_is_inclusive() {
        let rows = vec![
            row("Ana", "Soto", 1, 0, 0),
            row("Bruno", "Paz", 5, 0, 0),
            row("Carla", "Rey", 9, 0, 0),
        ];
        let query = ListQuery {
            date_from: Some(NaiveDate::from_ymd_opt(2026, 3, 1).unwrap()),
            date_to: Some(NaiveDate::from_ymd_opt(2026, 3, 5).unwrap()),
            ..Default::default()
        };
        let out = apply(rows, &SPEC, &query);
        assert_eq!(out["total"], 2);
    }

    #[test]
    fn sorts_by_derived_item_count_descending() {
        let rows = vec![row("Ana", "S", 1, 0, 1), row("Bruno", "P", 2, 0, 5)];
        let query = ListQuery {
            sort: Some("items".into()),
            ascending: false,
            ..Default::default()
        };
        let out = apply(rows, &SPEC, &query);
        assert_eq!(out["items"][0]["nombre"], "Bruno");
    }

    #[test]
    fn sorts_by_concatenated_name() {
        let rows = vec![row("Zoe", "Abad", 1, 0, 0), row("Ana", "Soto", 2, 0, 0)];
        let query = ListQuery {
            sort: Some("nombre".into()),
            ..Default::default()
        };
        let out = apply(rows, &SPEC, &query);
        assert_eq!(out["items"][0]["nombre"], "Ana");
    }

    #[test]
    fn unknown_sort_key_falls_back_to_default() {
        let rows = vec![row("Ana", "S", 9, 0, 0), row("Bruno", "P", 1, 0, 0)];
        let query = ListQuery {
            sort: Some("inexistente".into()),
            ..Default::default()
        };
        let out = apply(rows, &SPEC, &query);
        // default is the date column
        assert_eq!(out["items"][0]["nombre"], "Bruno");
    }

    #[test]
    fn paginates_with_fixed_page_size() {
        let rows: Vec<Value> = (1..=23).map(|d| row("Ana", "S", d.min(28), i64::from(d), 0)).collect();
        let query = ListQuery {
            page: 3,
            ..Default::default()
        };
        let out = apply(rows, &SPEC, &query);
        assert_eq!(out["total"], 23);
        assert_eq!(out["totalPaginas"], 3);
        assert_eq!(out["items"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn out_of_range_page_is_clamped() {
        let rows: Vec<Value> = (1..=5).map(|d| row("Ana", "S", d, 0, 0)).collect();
        let query = ListQuery {
            page: 99,
            ..Default::default()
        };
        let out = apply(rows, &SPEC, &query);
        assert_eq!(out["pagina"], 1);
    }

    #[test]
    fn pagination_control_with_both_ellipses() {
        // totalPages=10, currentPage=5 → 1 … 4 5 6 … 10
        let items = pagination_items(10, 5);
        let expected: Vec<Value> = vec![
            Value::from(1),
            Value::from("…"),
            Value::from(4),
            Value::from(5),
            Value::from(6),
            Value::from("…"),
            Value::from(10),
        ];
        assert_eq!(items, expected);
    }

    #[test]
    fn pagination_control_near_the_edges() {
        assert_eq!(
            pagination_items(10, 1),
            vec![
                Value::from(1),
                Value::from(2),
                Value::from("…"),
                Value::from(10)
            ]
        );
        assert_eq!(
            pagination_items(10, 9),
            vec![
                Value::from(1),
                Value::from("…"),
                Value::from(8),
                Value::from(9),
                Value::from(10)
            ]
        );
        assert_eq!(pagination_items(1, 1), vec![Value::from(1)]);
        assert_eq!(
            pagination_items(3, 2),
            vec![Value::from(1), Value::from(2), Value::from(3)]
        );
    }
}
