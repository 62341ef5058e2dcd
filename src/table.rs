use serde::Serialize;
use serde_json::Value;
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// Server-side twin of the client table state: raw rows plus the
/// user-driven controls (search text, sort column/direction, page
/// index/size), with the filtered/sorted/paginated views derived on
/// every read instead of being cached incrementally.
#[derive(Debug, Clone)]
pub struct TableState<T> {
    source: Vec<T>,
    search_query: String,
    page_index: usize,
    page_size: usize,
    sort_column: Option<String>,
    sort_direction: Option<SortDirection>,
}

impl<T> Default for TableState<T> {
    fn default() -> Self {
        Self {
            source: Vec::new(),
            search_query: String::new(),
            page_index: 1,
            page_size: 10,
            sort_column: None,
            sort_direction: None,
        }
    }
}

impl<T: Serialize + Clone> TableState<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wholesale replacement of the raw rows. Search, sort and page are
    /// deliberately left alone; a stale page can therefore render empty
    /// until the caller pages or searches again.
    pub fn set_source(&mut self, records: Vec<T>) {
        self.source = records;
    }

    pub fn set_search(&mut self, query: &str) {
        self.search_query = query.to_string();
        self.page_index = 1;
    }

    /// Three-state toggle: ascending, then descending, then cleared.
    /// A different column always restarts at ascending.
    pub fn set_sort(&mut self, column: &str) {
        match (self.sort_column.as_deref(), self.sort_direction) {
            (Some(c), Some(SortDirection::Ascending)) if c == column => {
                self.sort_direction = Some(SortDirection::Descending);
            }
            (Some(c), Some(SortDirection::Descending)) if c == column => {
                self.sort_column = None;
                self.sort_direction = None;
            }
            _ => {
                self.sort_column = Some(column.to_string());
                self.sort_direction = Some(SortDirection::Ascending);
            }
        }
    }

    /// Out-of-range requests are silently ignored so pagination widgets
    /// can fire freely at the edges.
    pub fn set_page(&mut self, page: usize) {
        if page >= 1 && page <= self.total_pages() {
            self.page_index = page;
        }
    }

    pub fn set_page_size(&mut self, size: usize) {
        if size == 0 {
            return;
        }
        self.page_size = size;
        self.page_index = 1;
    }

    pub fn search_query(&self) -> &str {
        &self.search_query
    }

    pub fn page_index(&self) -> usize {
        self.page_index
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn sort_column(&self) -> Option<&str> {
        self.sort_column.as_deref()
    }

    pub fn sort_direction(&self) -> Option<SortDirection> {
        self.sort_direction
    }

    /// Rows whose fields (stringified) contain the trimmed, lowercased
    /// query as a substring, in source order. Empty query matches all.
    pub fn filtered(&self) -> Vec<T> {
        let query = self.search_query.trim().to_lowercase();
        if query.is_empty() {
            return self.source.clone();
        }
        self.source
            .iter()
            .filter(|record| record_matches(record, &query))
            .cloned()
            .collect()
    }

    /// Stable permutation of `filtered()` under the current sort
    /// controls; with no sort active this is `filtered()` itself.
    pub fn sorted(&self) -> Vec<T> {
        let mut rows = self.filtered();
        let (Some(column), Some(direction)) = (self.sort_column.as_deref(), self.sort_direction)
        else {
            return rows;
        };
        rows.sort_by(|a, b| {
            let ord = compare_fields(a, b, column);
            match direction {
                SortDirection::Ascending => ord,
                SortDirection::Descending => ord.reverse(),
            }
        });
        rows
    }

    /// The contiguous window of `sorted()` for the current page.
    pub fn paginated(&self) -> Vec<T> {
        let rows = self.sorted();
        let start = (self.page_index - 1) * self.page_size;
        if start >= rows.len() {
            return Vec::new();
        }
        let end = (start + self.page_size).min(rows.len());
        rows[start..end].to_vec()
    }

    pub fn total_items(&self) -> usize {
        self.filtered().len()
    }

    pub fn total_pages(&self) -> usize {
        let items = self.total_items();
        if items == 0 {
            1
        } else {
            items.div_ceil(self.page_size)
        }
    }
}

fn record_matches<T: Serialize>(record: &T, query: &str) -> bool {
    let value = match serde_json::to_value(record) {
        Ok(v) => v,
        Err(_) => return false,
    };
    match value {
        Value::Object(map) => map
            .values()
            .any(|v| field_text(v).to_lowercase().contains(query)),
        other => field_text(&other).to_lowercase().contains(query),
    }
}

/// String fields match on their raw contents; everything else matches
/// on its JSON form, so arrays and nested objects can match on their
/// serialized brackets. That mirrors the stringify-everything search of
/// the original client.
fn field_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn compare_fields<T: Serialize>(a: &T, b: &T, column: &str) -> Ordering {
    let va = field_value(a, column);
    let vb = field_value(b, column);
    compare_values(&va, &vb)
}

fn field_value<T: Serialize>(record: &T, column: &str) -> Value {
    serde_json::to_value(record)
        .ok()
        .and_then(|v| v.get(column).cloned())
        .unwrap_or(Value::Null)
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        // Case-insensitive first, raw string as tie-break, standing in
        // for the locale-aware compare of the original client.
        (Value::String(x), Value::String(y)) => x
            .to_lowercase()
            .cmp(&y.to_lowercase())
            .then_with(|| x.cmp(y)),
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .unwrap_or(0.0)
            .partial_cmp(&y.as_f64().unwrap_or(0.0))
            .unwrap_or(Ordering::Equal),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        _ => field_text(a).cmp(&field_text(b)),
    }
}
