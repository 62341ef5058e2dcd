use serde_json::{json, Value};

use crate::table::TableState;

pub fn param_str<'a>(params: &'a Value, key: &str) -> Option<&'a str> {
    params.get(key).and_then(|v| v.as_str())
}

pub fn param_i64(params: &Value, key: &str) -> Option<i64> {
    params.get(key).and_then(|v| v.as_i64())
}

pub fn param_f64(params: &Value, key: &str) -> Option<f64> {
    params.get(key).and_then(|v| v.as_f64())
}

/// id arrays arrive as JSON arrays of numbers; anything else is None.
pub fn param_id_list(params: &Value, key: &str) -> Option<Vec<i64>> {
    let arr = params.get(key)?.as_array()?;
    arr.iter().map(|v| v.as_i64()).collect()
}

/// Text column holding a JSON document, or null.
pub fn json_column(raw: Option<String>) -> Value {
    raw.and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or(Value::Null)
}

/// Every `*.list` method funnels its rows through here. With none of
/// the table controls present the caller gets the plain array the
/// original API served; with any of `query` / `sortBy` / `page` /
/// `pageSize` the rows run through the search -> sort -> paginate
/// pipeline and come back in a page envelope.
pub fn list_result(params: &Value, rows: Vec<Value>) -> Value {
    let query = param_str(params, "query");
    let sort_by = param_str(params, "sortBy");
    let sort_dir = param_str(params, "sortDir");
    let page = param_i64(params, "page");
    let page_size = param_i64(params, "pageSize");

    if query.is_none() && sort_by.is_none() && page.is_none() && page_size.is_none() {
        return Value::Array(rows);
    }

    let mut table = TableState::new();
    table.set_source(rows);
    if let Some(q) = query {
        table.set_search(q);
    }
    if let Some(col) = sort_by {
        table.set_sort(col);
        if sort_dir == Some("desc") {
            // Second toggle on the same column flips to descending.
            table.set_sort(col);
        }
    }
    if let Some(size) = page_size {
        if size > 0 {
            table.set_page_size(size as usize);
        }
    }
    if let Some(p) = page {
        if p > 0 {
            table.set_page(p as usize);
        }
    }

    json!({
        "items": table.paginated(),
        "totalItems": table.total_items(),
        "totalPages": table.total_pages(),
        "page": table.page_index(),
        "pageSize": table.page_size(),
    })
}
