//! Cache log → results table

use harvest_core::{ProcessedRecord, Projection, TableRow, TableSpec};
use serde_json::Value;

fn text(v: Option<&Value>) -> Option<String> {
    match v? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Id columns, the text column, then `generated_query`.
#[derive(Debug, Clone)]
pub struct ResultsProjection {
    pub id_columns: Vec<String>,
    pub text_column: String,
}

impl Projection for ResultsProjection {
    fn tables(&self) -> Vec<TableSpec> {
        let mut columns = self.id_columns.clone();
        columns.push(self.text_column.clone());
        columns.push("generated_query".to_string());
        vec![TableSpec {
            name: "results".to_string(),
            columns,
        }]
    }

    /// Failed rows are kept with an empty query.
    fn project(&self, record: &ProcessedRecord) -> Vec<TableRow> {
        let mut cells: Vec<Option<String>> = self
            .id_columns
            .iter()
            .map(|c| text(record.item_field(c)))
            .collect();
        cells.push(text(record.item_field(&self.text_column)));
        cells.push(text(record.payload.as_ref().and_then(|p| p.get("question"))));
        vec![TableRow { table: 0, cells }]
    }
}
