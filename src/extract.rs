//! Parsing of language-model metadata responses
//!
//! The model is asked to answer in a fixed line format:
//!
//! ```text
//! AUTHORS: <comma-separated names, or Unknown>
//! YEAR: <4-digit year, or Unknown>
//! TYPE: <paper | handbook | manual | report | other>
//! ```
//!
//! Parsing is lenient: labels are case-insensitive, unrecognised lines are
//! ignored and values that do not make sense are dropped.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const MIN_YEAR: i64 = 1900;
const MAX_YEAR: i64 = 2100;

/// Document classification stored in the catalog and the index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    Paper,
    Handbook,
    Manual,
    Report,
    Other,
}

impl DocumentType {
    pub const ALL: [DocumentType; 5] = [
        DocumentType::Paper,
        DocumentType::Handbook,
        DocumentType::Manual,
        DocumentType::Report,
        DocumentType::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DocumentType::Paper => "paper",
            DocumentType::Handbook => "handbook",
            DocumentType::Manual => "manual",
            DocumentType::Report => "report",
            DocumentType::Other => "other",
        }
    }

    /// Parse a model-supplied type; anything unrecognised is `Other`
    pub fn from_label(label: &str) -> Self {
        label.parse().unwrap_or(DocumentType::Other)
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        DocumentType::ALL
            .into_iter()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| {
                format!(
                    "unknown document type '{}', expected one of: paper, handbook, manual, report, other",
                    s.trim()
                )
            })
    }
}

/// Bibliographic metadata extracted from a document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub authors: Vec<String>,
    pub publication_year: Option<i64>,
    pub document_type: Option<DocumentType>,
}

fn is_unknown(value: &str) -> bool {
    value.is_empty() || value.eq_ignore_ascii_case("unknown")
}

/// Value after `label` when `line` starts with it, ignoring case
fn labelled<'a>(line: &'a str, label: &str) -> Option<&'a str> {
    let head = line.get(..label.len())?;
    if head.eq_ignore_ascii_case(label) {
        Some(line[label.len()..].trim())
    } else {
        None
    }
}

fn parse_authors(value: &str) -> Vec<String> {
    if is_unknown(value) {
        return Vec::new();
    }
    value
        .split(',')
        .map(str::trim)
        .filter(|a| !is_unknown(a))
        .map(str::to_string)
        .collect()
}

fn parse_year(value: &str) -> Option<i64> {
    if is_unknown(value) {
        return None;
    }
    value
        .parse::<i64>()
        .ok()
        .filter(|y| (MIN_YEAR..=MAX_YEAR).contains(y))
}

/// Accept `year` only within the supported publication range
pub fn check_publication_year(year: i64) -> Result<i64, String> {
    if (MIN_YEAR..=MAX_YEAR).contains(&year) {
        Ok(year)
    } else {
        Err(format!(
            "Publication year {} out of range ({}-{})",
            year, MIN_YEAR, MAX_YEAR
        ))
    }
}

/// Parse a model response into structured metadata.
///
/// A later line with the same label overrides an earlier one.
pub fn parse_llm_response(response: &str) -> DocumentMetadata {
    let mut metadata = DocumentMetadata::default();

    for line in response.trim().lines().map(str::trim) {
        if let Some(value) = labelled(line, "AUTHORS:") {
            if !is_unknown(value) {
                metadata.authors = parse_authors(value);
            }
        } else if let Some(value) = labelled(line, "YEAR:") {
            if let Some(year) = parse_year(value) {
                metadata.publication_year = Some(year);
            }
        } else if let Some(value) = labelled(line, "TYPE:") {
            metadata.document_type = Some(DocumentType::from_label(value));
        }
    }

    metadata
}
