//! Compound record → `compounds.csv` and `descriptions.csv` rows
//!
//! Records are deeply nested PUG-View documents. Every lookup is optional:
//! a missing section becomes an empty cell, never an error.

use harvest_core::{ProcessedRecord, Projection, TableRow, TableSpec};
use serde_json::Value;

/// Description entries with this reference number are dropped.
const EXCLUDED_REFERENCE: i64 = 111;

pub const COMPOUND_COLUMNS: &[&str] = &[
    "CID",
    "Title",
    "MolecularFormula",
    "IUPACName",
    "InChI",
    "SMILES",
    "Synonyms",
];

pub const DESCRIPTION_COLUMNS: &[&str] = &[
    "CID",
    "Title",
    "Description",
    "ReferenceNumber",
    "SourceName",
    "SourceID",
    "ReferenceDescription",
    "URL",
];

/// Child section of `sections` with the given TOC heading.
fn section<'a>(sections: Option<&'a Value>, heading: &str) -> Option<&'a Value> {
    sections?
        .as_array()?
        .iter()
        .find(|s| s.get("TOCHeading").and_then(Value::as_str) == Some(heading))
}

/// First string value of an `Information` entry.
fn info_string(info: &Value) -> Option<&str> {
    info.pointer("/Value/StringWithMarkup/0/String")?.as_str()
}

/// First string of a section's first `Information` entry.
fn first_string(sec: Option<&Value>) -> Option<String> {
    info_string(sec?.get("Information")?.get(0)?).map(str::to_string)
}

fn scalar_text(v: Option<&Value>) -> Option<String> {
    match v? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Synonyms worth keeping: no two consecutive digits, at least one letter,
/// 3 to 105 characters.
pub fn is_textual(s: &str) -> bool {
    let chars: Vec<char> = s.chars().collect();
    let has_digit_pair = chars.windows(2).any(|w| w[0].is_ascii_digit() && w[1].is_ascii_digit());
    let has_letter = chars.iter().any(char::is_ascii_alphabetic);
    !has_digit_pair && has_letter && (3..=105).contains(&chars.len())
}

/// Fields of one compound row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Compound {
    pub cid: Option<String>,
    pub title: Option<String>,
    pub molecular_formula: Option<String>,
    pub iupac_name: Option<String>,
    pub inchi: Option<String>,
    pub smiles: Option<String>,
    pub synonyms: Vec<String>,
}

/// One record description with its reference metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Description {
    pub reference_number: i64,
    pub text: String,
    pub source_name: Option<String>,
    pub source_id: Option<String>,
    pub reference_description: Option<String>,
    pub url: Option<String>,
}

pub fn extract_compound(record: &Value) -> Compound {
    let names = section(record.get("Section"), "Names and Identifiers");
    let names_sections = names.and_then(|n| n.get("Section"));
    let descriptors = section(names_sections, "Computed Descriptors").and_then(|d| d.get("Section"));

    let synonyms = section(names_sections, "Synonyms")
        .and_then(|s| section(s.get("Section"), "Depositor-Supplied Synonyms"))
        .and_then(|s| s.pointer("/Information/0/Value/StringWithMarkup"))
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(|m| m.get("String").and_then(Value::as_str))
                .filter(|s| is_textual(s))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    Compound {
        cid: scalar_text(record.get("RecordNumber")),
        title: scalar_text(record.get("RecordTitle")),
        molecular_formula: first_string(section(names_sections, "Molecular Formula")),
        iupac_name: first_string(section(descriptors, "IUPAC Name")),
        inchi: first_string(section(descriptors, "InChI")),
        smiles: first_string(section(descriptors, "SMILES")),
        synonyms,
    }
}

/// Record descriptions keyed by reference number; a later entry for the same
/// reference replaces the earlier text in place.
pub fn extract_descriptions(record: &Value) -> Vec<Description> {
    let names = section(record.get("Section"), "Names and Identifiers");
    let Some(infos) = section(names.and_then(|n| n.get("Section")), "Record Description")
        .and_then(|s| s.get("Information"))
        .and_then(Value::as_array)
    else {
        return Vec::new();
    };

    let references = record.get("Reference").and_then(Value::as_array);
    let reference = |number: i64| {
        references?
            .iter()
            .find(|r| r.get("ReferenceNumber").and_then(Value::as_i64) == Some(number))
    };

    let mut out: Vec<Description> = Vec::new();
    for info in infos {
        let (Some(number), Some(text)) = (
            info.get("ReferenceNumber").and_then(Value::as_i64),
            info_string(info),
        ) else {
            continue;
        };
        if number == EXCLUDED_REFERENCE {
            continue;
        }
        let r = reference(number);
        let desc = Description {
            reference_number: number,
            text: text.to_string(),
            source_name: scalar_text(r.and_then(|r| r.get("SourceName"))),
            source_id: scalar_text(r.and_then(|r| r.get("SourceID"))),
            reference_description: scalar_text(r.and_then(|r| r.get("Description"))),
            url: scalar_text(r.and_then(|r| r.get("URL"))),
        };
        match out.iter_mut().find(|d| d.reference_number == number) {
            Some(existing) => *existing = desc,
            None => out.push(desc),
        }
    }
    out
}

/// Two tables: compounds (table 0) and descriptions (table 1).
#[derive(Debug, Default, Clone, Copy)]
pub struct CompoundProjection;

impl Projection for CompoundProjection {
    fn tables(&self) -> Vec<TableSpec> {
        vec![
            TableSpec::new("compounds", COMPOUND_COLUMNS),
            TableSpec::new("descriptions", DESCRIPTION_COLUMNS),
        ]
    }

    fn project(&self, record: &ProcessedRecord) -> Vec<TableRow> {
        let Some(doc) = record.payload.as_ref().and_then(|p| p.get("Record")) else {
            return Vec::new();
        };
        let compound = extract_compound(doc);
        let cid = compound.cid.clone().or_else(|| Some(record.key.to_string()));
        let synonyms = serde_json::to_string(&compound.synonyms).ok();

        let mut rows = vec![TableRow {
            table: 0,
            cells: vec![
                cid.clone(),
                compound.title.clone(),
                compound.molecular_formula,
                compound.iupac_name,
                compound.inchi,
                compound.smiles,
                synonyms,
            ],
        }];
        rows.extend(extract_descriptions(doc).into_iter().map(|d| TableRow {
            table: 1,
            cells: vec![
                cid.clone(),
                compound.title.clone(),
                Some(d.text),
                Some(d.reference_number.to_string()),
                d.source_name,
                d.source_id,
                d.reference_description,
                d.url,
            ],
        }));
        rows
    }
}
