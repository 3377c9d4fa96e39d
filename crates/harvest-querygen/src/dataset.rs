//! CSV rows as work items

use std::path::Path;

use anyhow::{Context, Result, bail};
use harvest_core::{Key, WorkItem};
use serde_json::{Map, Value};

/// One dataset row, keyed by the configured id columns.
#[derive(Debug, Clone, PartialEq)]
pub struct RowItem {
    key: Key,
    pub row: Map<String, Value>,
}

impl RowItem {
    pub fn new(row: Map<String, Value>, id_columns: &[String]) -> Self {
        Self {
            key: Key::from_fields(&row, id_columns),
            row,
        }
    }

    /// Text of `column`, empty when the cell is missing or null.
    pub fn text(&self, column: &str) -> String {
        match self.row.get(column) {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        }
    }
}

impl WorkItem for RowItem {
    fn key(&self) -> Key {
        self.key.clone()
    }

    fn context(&self) -> Option<Value> {
        Some(Value::Object(self.row.clone()))
    }
}

/// Integer text that survives a round trip through `i64` unchanged.
///
/// "007" and "+5" are not canonical, so they stay strings and never collide
/// with "7" or "5".
fn canonical_int(cell: &str) -> Option<i64> {
    cell.parse::<i64>().ok().filter(|n| n.to_string() == cell)
}

/// A column is numeric when every non-empty cell is a canonical integer.
fn numeric_columns(width: usize, records: &[csv::StringRecord]) -> Vec<bool> {
    (0..width)
        .map(|col| {
            let mut cells = records
                .iter()
                .filter_map(|r| r.get(col))
                .filter(|c| !c.is_empty())
                .peekable();
            cells.peek().is_some() && cells.all(|c| canonical_int(c).is_some())
        })
        .collect()
}

/// Empty cells become null and cells of numeric columns become numbers, so
/// keys compare the same way whether they come from the CSV or a persisted
/// record.
fn cell_value(cell: &str, numeric: bool) -> Value {
    if cell.is_empty() {
        return Value::Null;
    }
    match canonical_int(cell).filter(|_| numeric) {
        Some(n) => Value::from(n),
        None => Value::String(cell.to_string()),
    }
}

/// Read a headed CSV into one JSON object per row.
///
/// Fails when `required` names a column the header lacks.
pub fn load_rows(path: &Path, required: &[&str]) -> Result<Vec<Map<String, Value>>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open dataset {}", path.display()))?;
    let headers = reader
        .headers()
        .with_context(|| format!("Failed to read header of {}", path.display()))?
        .clone();

    let missing: Vec<&str> = required
        .iter()
        .copied()
        .filter(|c| !headers.iter().any(|h| h == *c))
        .collect();
    if !missing.is_empty() {
        bail!(
            "{}: missing columns {}",
            path.display(),
            missing.join(", ")
        );
    }

    let records = reader
        .records()
        .enumerate()
        .map(|(i, record)| {
            record.with_context(|| format!("{}: bad row {}", path.display(), i + 1))
        })
        .collect::<Result<Vec<_>>>()?;
    let numeric = numeric_columns(headers.len(), &records);

    let rows: Vec<Map<String, Value>> = records
        .iter()
        .map(|record| {
            headers
                .iter()
                .zip(record.iter())
                .zip(&numeric)
                .map(|((h, cell), &num)| (h.to_string(), cell_value(cell, num)))
                .collect()
        })
        .collect();
    log::info!("Loaded {} rows from {}", rows.len(), path.display());
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use harvest_core::KeyPart;
    use tempfile::TempDir;

    #[test]
    fn rows_and_composite_keys() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.csv");
        std::fs::write(&path, "doc,para,text\nd1,0,\"Hello, world\"\nd1,1,\n").unwrap();

        let rows = load_rows(&path, &["doc", "para", "text"]).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["text"], "Hello, world");
        assert_eq!(rows[1]["text"], Value::Null);

        let ids = vec!["doc".to_string(), "para".to_string()];
        let item = RowItem::new(rows[1].clone(), &ids);
        assert_eq!(
            item.key(),
            Key::Composite(vec![KeyPart::Text("d1".into()), KeyPart::Int(1)])
        );
        assert_eq!(item.text("text"), "");
        assert_eq!(item.context().unwrap()["para"], 1);
    }

    #[test]
    fn missing_column_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.csv");
        std::fs::write(&path, "id,body\n1,x\n").unwrap();

        let err = load_rows(&path, &["id", "text"]).unwrap_err();
        assert!(err.to_string().contains("missing columns text"));
    }

    #[test]
    fn ids_keep_their_spelling() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.csv");
        std::fs::write(&path, "id,n,text\nA1,+5,alpha\n007,5,bravo\n7,-3,charlie\n").unwrap();

        let rows = load_rows(&path, &["id", "text"]).unwrap();
        let ids = vec!["id".to_string()];
        let keys: Vec<Key> = rows.iter().map(|r| RowItem::new(r.clone(), &ids).key()).collect();
        assert_eq!(
            keys,
            vec![
                Key::Composite(vec![KeyPart::Text("A1".into())]),
                Key::Composite(vec![KeyPart::Text("007".into())]),
                Key::Composite(vec![KeyPart::Text("7".into())]),
            ]
        );
        // "+5" keeps the whole column textual
        assert_eq!(rows[0]["n"], "+5");
        assert_eq!(rows[1]["n"], "5");
    }

    #[test]
    fn canonical_integer_columns_are_numbers() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.csv");
        std::fs::write(&path, "id,text\n-3,x\n,y\n12,z\n").unwrap();

        let rows = load_rows(&path, &["id"]).unwrap();
        assert_eq!(rows[0]["id"], -3);
        assert_eq!(rows[1]["id"], Value::Null);
        assert_eq!(rows[2]["id"], 12);
        assert_eq!(rows[2]["text"], "z");
    }
}
