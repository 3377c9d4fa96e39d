//! Listing hit → metadata row

use harvest_core::{ProcessedRecord, Projection, TableRow, TableSpec};
use serde_json::Value;

pub const METADATA_COLUMNS: &[&str] = &[
    "id",
    "doi",
    "title",
    "abstract",
    "publishedDate",
    "submittedDate",
    "status",
    "version",
    "license",
    "keywords",
    "authors",
    "pdf_url",
];

fn text(v: Option<&Value>) -> Option<String> {
    match v? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// URL of the original PDF asset.
pub fn pdf_url(item: &Value) -> Option<&str> {
    item.pointer("/asset/original/url")?
        .as_str()
        .filter(|u| !u.is_empty())
}

/// "First Last" for each author with a non-blank name, joined by "; ".
pub fn author_names(item: &Value) -> String {
    let Some(authors) = item.get("authors").and_then(Value::as_array) else {
        return String::new();
    };
    authors
        .iter()
        .filter_map(|a| {
            let first = a.get("firstName").and_then(Value::as_str).unwrap_or("");
            let last = a.get("lastName").and_then(Value::as_str).unwrap_or("");
            let full = format!("{first} {last}");
            let full = full.trim();
            (!full.is_empty()).then(|| full.to_string())
        })
        .collect::<Vec<_>>()
        .join("; ")
}

fn keywords(item: &Value) -> Option<String> {
    match item.get("keywords")? {
        Value::Array(list) => Some(
            list.iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join("; "),
        ),
        other => text(Some(other)),
    }
}

/// Single metadata table.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetadataProjection;

impl Projection for MetadataProjection {
    fn tables(&self) -> Vec<TableSpec> {
        vec![TableSpec::new("chemrxiv_metadata", METADATA_COLUMNS)]
    }

    fn project(&self, record: &ProcessedRecord) -> Vec<TableRow> {
        let Some(item) = record.payload.as_ref().and_then(|p| p.get("item")) else {
            return Vec::new();
        };
        vec![TableRow {
            table: 0,
            cells: vec![
                Some(record.key.to_string()),
                text(item.get("doi")),
                text(item.get("title")),
                text(item.get("abstract")),
                text(item.get("publishedDate")),
                text(item.get("submittedDate")),
                text(item.get("status")),
                text(item.get("version")),
                text(item.pointer("/license/name")),
                keywords(item),
                Some(author_names(item)),
                pdf_url(item).map(str::to_string),
            ],
        }]
    }
}

/// Cap a file name at `max_len` bytes, keeping the extension.
pub fn safe_filename(name: &str, max_len: usize) -> String {
    if name.len() <= max_len {
        return name.to_string();
    }
    let (stem, ext) = match name.rfind('.') {
        Some(i) if i > 0 => name.split_at(i),
        _ => (name, ""),
    };
    let mut allowed = max_len.saturating_sub(ext.len());
    while allowed > 0 && !stem.is_char_boundary(allowed) {
        allowed -= 1;
    }
    format!("{}{ext}", &stem[..allowed.min(stem.len())])
}

#[cfg(test)]
mod tests {
    use super::*;
    use harvest_core::{Fetched, Key};
    use serde_json::json;

    fn hit() -> Value {
        json!({
            "item": {
                "id": "60c7",
                "doi": "10.26434/chemrxiv.1",
                "title": "Catalysis",
                "abstract": "We study, carefully.",
                "publishedDate": "2021-06-14T00:00:00Z",
                "version": 2,
                "license": {"name": "CC BY 4.0"},
                "keywords": ["catalysis", "DFT"],
                "authors": [
                    {"firstName": "Ada", "lastName": "Lovelace"},
                    {"firstName": "", "lastName": ""},
                    {"lastName": "Curie"}
                ],
                "asset": {"original": {"url": "https://example.org/60c7.pdf"}}
            }
        })
    }

    #[test]
    fn metadata_row() {
        let record = ProcessedRecord::success(Key::Text("60c7".into()), None, Fetched::new(hit()), 1);
        let rows = MetadataProjection.project(&record);
        assert_eq!(rows.len(), 1);
        let cells = &rows[0].cells;
        assert_eq!(cells.len(), METADATA_COLUMNS.len());
        assert_eq!(cells[0].as_deref(), Some("60c7"));
        assert_eq!(cells[5], None);
        assert_eq!(cells[7].as_deref(), Some("2"));
        assert_eq!(cells[8].as_deref(), Some("CC BY 4.0"));
        assert_eq!(cells[9].as_deref(), Some("catalysis; DFT"));
        assert_eq!(cells[10].as_deref(), Some("Ada Lovelace; Curie"));
        assert_eq!(cells[11].as_deref(), Some("https://example.org/60c7.pdf"));
    }

    #[test]
    fn sparse_item_gives_empty_cells() {
        let record = ProcessedRecord::success(
            Key::Text("x".into()),
            None,
            Fetched::new(json!({"item": {"id": "x"}})),
            1,
        );
        let cells = &MetadataProjection.project(&record)[0].cells;
        assert_eq!(cells[10].as_deref(), Some(""));
        assert!(cells[11].is_none());
    }

    #[test]
    fn safe_filename_keeps_extension() {
        assert_eq!(safe_filename("abc.pdf", 255), "abc.pdf");
        let long = format!("{}.pdf", "a".repeat(300));
        let safe = safe_filename(&long, 255);
        assert_eq!(safe.len(), 255);
        assert!(safe.ends_with(".pdf"));
    }

    #[test]
    fn safe_filename_respects_char_boundaries() {
        let long = format!("{}.pdf", "é".repeat(200));
        let safe = safe_filename(&long, 255);
        assert!(safe.len() <= 255);
        assert!(safe.ends_with(".pdf"));
    }
}
