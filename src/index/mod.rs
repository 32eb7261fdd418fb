//! Vector index over document chunks
//!
//! This module defines the contract every index implementation honours:
//! - Insert, search, count, delete, metadata update and reset
//! - Equality filters shared by search and delete
//! - Sentinel results at the boundary instead of propagated errors
//!
//! Two implementations exist: [`lance::LanceBackend`] (local tables) and
//! [`qdrant::QdrantBackend`] (Qdrant collection).

pub mod lance;
pub mod qdrant;
pub mod query;
pub mod record;

pub use query::SearchResults;
pub use record::{ChunkMetadata, ChunkRecord};

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use tracing::error;

/// Operations every vector index offers.
///
/// All methods are total: failures are logged and reported as `false`, an
/// empty result, or zero, never as an error.
#[async_trait]
pub trait VectorBackend: Send + Sync {
    /// Short backend name for logs and status output
    fn name(&self) -> &'static str;

    /// Insert one record per chunk. Empty input succeeds without touching the
    /// table; missing metadata entries default to empty metadata.
    async fn add_documents(
        &self,
        chunks: &[String],
        embeddings: &[Vec<f32>],
        metadatas: &[ChunkMetadata],
    ) -> bool;

    /// Nearest-neighbour search with optional equality filter and paging
    async fn search(
        &self,
        query_embedding: &[f32],
        n_results: i64,
        filter: Option<&Filter>,
        offset: i64,
    ) -> SearchResults;

    /// Number of stored chunks (0 when the table is absent)
    async fn get_document_count(&self) -> usize;

    /// Delete by equality filter or by explicit id set.
    ///
    /// The filter wins when both are given; neither is invalid use.
    async fn delete(&self, filter: Option<&Filter>, ids: Option<&[String]>) -> bool;

    /// Overwrite the document-level metadata on every chunk of `pdf_id`.
    ///
    /// Values left as `None` are reset to their sentinels.
    async fn update_document_metadata(
        &self,
        pdf_id: i64,
        publication_year: Option<i64>,
        authors: Option<&[String]>,
        document_type: Option<&str>,
    ) -> bool;

    /// Drop all persisted state and schedule a rebuild
    async fn reset(&self) -> bool;

    /// Delete `delete_ids`, then insert `records`
    async fn replace_documents(&self, delete_ids: &[String], records: Vec<ChunkRecord>) -> bool;

    /// Wait for a scheduled background rebuild, if any, to finish
    async fn wait_for_rebuild(&self) {}
}

/// Log a failed backend operation and fall back to its sentinel
pub(crate) fn settle<T>(backend: &str, operation: &str, result: Result<T>, fallback: T) -> T {
    match result {
        Ok(value) => value,
        Err(e) => {
            error!(backend, operation, error = %e, "Vector index operation failed");
            fallback
        }
    }
}

/// Lifecycle state of the persisted table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableState {
    /// No table has been persisted yet
    Uninitialized,
    /// The table exists but holds no rows
    CreatedEmpty,
    /// The table holds rows
    Populated,
}

impl TableState {
    pub fn classify(exists: bool, rows: usize) -> Self {
        match (exists, rows) {
            (false, _) => Self::Uninitialized,
            (true, 0) => Self::CreatedEmpty,
            (true, _) => Self::Populated,
        }
    }

    /// Whether a rebuild from the catalog should be scheduled
    pub fn needs_rebuild(self) -> bool {
        !matches!(self, Self::Populated)
    }
}

impl fmt::Display for TableState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Uninitialized => "uninitialized",
            Self::CreatedEmpty => "empty",
            Self::Populated => "populated",
        };
        f.write_str(label)
    }
}

/// A scalar value compared for equality in a filter
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl FilterValue {
    /// Render as a SQL literal; strings are quoted with embedded quotes doubled
    pub fn to_sql_literal(&self) -> String {
        match self {
            Self::Str(s) => quote_sql_string(s),
            Self::Int(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Bool(b) => b.to_string(),
        }
    }
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<i64> for FilterValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for FilterValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for FilterValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Conjunction of column equality clauses
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    clauses: BTreeMap<String, FilterValue>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) the clause `column = value`
    pub fn eq(mut self, column: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        self.clauses.insert(column.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FilterValue)> {
        self.clauses.iter()
    }

    pub fn get(&self, column: &str) -> Option<&FilterValue> {
        self.clauses.get(column)
    }

    /// SQL predicate for the filter, `None` when it has no clauses.
    ///
    /// Column names must be plain identifiers.
    pub fn to_predicate(&self) -> Result<Option<String>> {
        if self.clauses.is_empty() {
            return Ok(None);
        }

        let mut parts = Vec::with_capacity(self.clauses.len());
        for (column, value) in &self.clauses {
            if !is_identifier(column) {
                return Err(Error::Other(format!(
                    "Invalid filter column name: {:?}",
                    column
                )));
            }
            parts.push(format!("{} = {}", column, value.to_sql_literal()));
        }
        Ok(Some(parts.join(" AND ")))
    }
}

/// Predicate selecting the given chunk ids, `None` for an empty set
pub fn id_predicate(ids: &[String]) -> Option<String> {
    if ids.is_empty() {
        return None;
    }
    let quoted: Vec<String> = ids.iter().map(|id| quote_sql_string(id)).collect();
    Some(format!("id IN ({})", quoted.join(", ")))
}

fn quote_sql_string(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_predicate_quotes_strings() {
        let filter = Filter::new()
            .eq("document_type", "paper")
            .eq("source", "O'Brien's notes.pdf");

        assert_eq!(
            filter.to_predicate().unwrap().unwrap(),
            "document_type = 'paper' AND source = 'O''Brien''s notes.pdf'"
        );
    }

    #[test]
    fn test_filter_predicate_bare_scalars() {
        let filter = Filter::new()
            .eq("pdf_id", 42i64)
            .eq("publication_year", 2023i64)
            .eq("flagged", true);

        assert_eq!(
            filter.to_predicate().unwrap().unwrap(),
            "flagged = true AND pdf_id = 42 AND publication_year = 2023"
        );
        assert_eq!(FilterValue::Float(0.5).to_sql_literal(), "0.5");
    }

    #[test]
    fn test_empty_filter_has_no_predicate() {
        assert!(Filter::new().to_predicate().unwrap().is_none());
    }

    #[test]
    fn test_filter_rejects_non_identifier_columns() {
        let filter = Filter::new().eq("pdf_id = 1 OR 1", 1i64);
        assert!(filter.to_predicate().is_err());
    }

    #[test]
    fn test_eq_replaces_existing_clause() {
        let filter = Filter::new().eq("pdf_id", 1i64).eq("pdf_id", 2i64);
        assert_eq!(filter.get("pdf_id"), Some(&FilterValue::Int(2)));
    }

    #[test]
    fn test_id_predicate() {
        let ids = vec!["doc_1_a".to_string(), "doc_1_'b".to_string()];
        assert_eq!(
            id_predicate(&ids).unwrap(),
            "id IN ('doc_1_a', 'doc_1_''b')"
        );
        assert!(id_predicate(&[]).is_none());
    }

    #[test]
    fn test_table_state_classification() {
        assert_eq!(TableState::classify(false, 0), TableState::Uninitialized);
        assert_eq!(TableState::classify(true, 0), TableState::CreatedEmpty);
        assert_eq!(TableState::classify(true, 7), TableState::Populated);
        assert!(TableState::Uninitialized.needs_rebuild());
        assert!(TableState::CreatedEmpty.needs_rebuild());
        assert!(!TableState::Populated.needs_rebuild());
    }
}
