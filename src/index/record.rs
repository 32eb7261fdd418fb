//! Chunk records and their Arrow schema
//!
//! A [`ChunkRecord`] is one row of the index table. Every structured column
//! carries a typed sentinel (0, "", empty list) instead of null so that
//! batches built from sparse metadata always share one schema.

use crate::error::{Error, Result};
use arrow_array::builder::{ListBuilder, StringBuilder};
use arrow_array::{
    Array, ArrayRef, FixedSizeListArray, Float32Array, Float64Array, Int64Array, ListArray,
    RecordBatch, StringArray,
};
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Metadata attached to a chunk at insert time.
///
/// Known keys are typed; anything else is kept in `extra` and survives in the
/// serialized blob.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdf_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publication_year: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authors: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_type: Option<String>,

    /// Caller-supplied keys without a dedicated column
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Deterministic record id for a chunk of a document
pub fn chunk_record_id(pdf_id: i64, chunk_id: &str) -> String {
    format!("doc_{}_{}", pdf_id, chunk_id)
}

/// One row of the index table
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkRecord {
    pub id: String,
    pub text: String,
    pub vector: Vec<f32>,
    pub pdf_id: i64,
    pub source: String,
    pub chunk_id: String,
    pub page: i64,
    pub batch: String,
    pub index: i64,
    pub length: i64,
    pub timestamp: f64,
    /// Full insert-time metadata, JSON encoded
    pub metadata: String,
    pub publication_year: i64,
    pub authors: Vec<String>,
    pub document_type: String,
}

impl ChunkRecord {
    /// Build a row, coercing absent fields to their sentinels
    pub fn build(text: &str, vector: Vec<f32>, meta: &ChunkMetadata) -> Result<Self> {
        let pdf_id = meta.pdf_id.unwrap_or(0);
        let chunk_id = meta.chunk_id.clone().unwrap_or_default();

        Ok(Self {
            id: chunk_record_id(pdf_id, &chunk_id),
            text: text.to_string(),
            vector,
            pdf_id,
            source: meta.source.clone().unwrap_or_default(),
            chunk_id,
            page: meta.page.unwrap_or(0),
            batch: meta.batch.clone().unwrap_or_default(),
            index: meta.index.unwrap_or(0),
            length: meta.length.unwrap_or(0),
            timestamp: meta.timestamp.unwrap_or(0.0),
            metadata: serde_json::to_string(meta)?,
            publication_year: meta.publication_year.unwrap_or(0),
            authors: meta.authors.clone().unwrap_or_default(),
            document_type: meta.document_type.clone().unwrap_or_default(),
        })
    }

    /// Overwrite the document-level metadata on this row.
    ///
    /// The columns and the matching keys of the JSON blob change together; a
    /// blob that is not a JSON object is replaced.
    pub fn rewrite_metadata(
        &mut self,
        publication_year: Option<i64>,
        authors: Option<&[String]>,
        document_type: Option<&str>,
    ) {
        self.publication_year = publication_year.unwrap_or(0);
        self.authors = authors.map(|a| a.to_vec()).unwrap_or_default();
        self.document_type = document_type.unwrap_or_default().to_string();

        let mut blob = parse_metadata_blob(&self.metadata);
        blob.insert(
            "publication_year".to_string(),
            Value::from(self.publication_year),
        );
        blob.insert("authors".to_string(), Value::from(self.authors.clone()));
        blob.insert(
            "document_type".to_string(),
            Value::from(self.document_type.clone()),
        );
        self.metadata = Value::Object(blob).to_string();
    }
}

/// Decode a stored metadata blob; anything but a JSON object yields an empty map
pub fn parse_metadata_blob(raw: &str) -> Map<String, Value> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

/// Build rows for parallel chunk/embedding/metadata slices
pub fn build_records(
    chunks: &[String],
    embeddings: &[Vec<f32>],
    metadatas: &[ChunkMetadata],
) -> Result<Vec<ChunkRecord>> {
    if chunks.len() != embeddings.len() {
        return Err(Error::Other(format!(
            "Got {} chunks but {} embeddings",
            chunks.len(),
            embeddings.len()
        )));
    }

    let empty = ChunkMetadata::default();
    chunks
        .iter()
        .zip(embeddings)
        .enumerate()
        .map(|(i, (text, vector))| {
            ChunkRecord::build(text, vector.clone(), metadatas.get(i).unwrap_or(&empty))
        })
        .collect()
}

/// Arrow schema of the chunk table for vectors of width `dimension`
pub fn chunk_schema(dimension: usize) -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new("text", DataType::Utf8, false),
        Field::new(
            "vector",
            DataType::FixedSizeList(
                Arc::new(Field::new("item", DataType::Float32, true)),
                dimension as i32,
            ),
            false,
        ),
        Field::new("pdf_id", DataType::Int64, false),
        Field::new("source", DataType::Utf8, false),
        Field::new("chunk_id", DataType::Utf8, false),
        Field::new("page", DataType::Int64, false),
        Field::new("batch", DataType::Utf8, false),
        Field::new("index", DataType::Int64, false),
        Field::new("length", DataType::Int64, false),
        Field::new("timestamp", DataType::Float64, false),
        Field::new("metadata", DataType::Utf8, false),
        Field::new("publication_year", DataType::Int64, false),
        Field::new(
            "authors",
            DataType::List(Arc::new(Field::new("item", DataType::Utf8, true))),
            false,
        ),
        Field::new("document_type", DataType::Utf8, false),
    ]))
}

/// Convert rows to a record batch, rejecting vectors of the wrong width
pub fn records_to_batch(records: &[ChunkRecord], dimension: usize) -> Result<RecordBatch> {
    if let Some(bad) = records.iter().find(|r| r.vector.len() != dimension) {
        return Err(Error::DimensionMismatch {
            expected: dimension,
            actual: bad.vector.len(),
        });
    }

    let strings = |f: fn(&ChunkRecord) -> &str| -> ArrayRef {
        Arc::new(StringArray::from_iter_values(records.iter().map(f)))
    };
    let ints = |f: fn(&ChunkRecord) -> i64| -> ArrayRef {
        Arc::new(Int64Array::from_iter_values(records.iter().map(f)))
    };

    let values = Float32Array::from_iter_values(records.iter().flat_map(|r| r.vector.iter().copied()));
    let vectors = FixedSizeListArray::try_new(
        Arc::new(Field::new("item", DataType::Float32, true)),
        dimension as i32,
        Arc::new(values),
        None,
    )?;

    let mut authors = ListBuilder::new(StringBuilder::new());
    for record in records {
        for author in &record.authors {
            authors.values().append_value(author);
        }
        authors.append(true);
    }

    let columns: Vec<ArrayRef> = vec![
        strings(|r| &r.id),
        strings(|r| &r.text),
        Arc::new(vectors),
        ints(|r| r.pdf_id),
        strings(|r| &r.source),
        strings(|r| &r.chunk_id),
        ints(|r| r.page),
        strings(|r| &r.batch),
        ints(|r| r.index),
        ints(|r| r.length),
        Arc::new(Float64Array::from_iter_values(records.iter().map(|r| r.timestamp))),
        strings(|r| &r.metadata),
        ints(|r| r.publication_year),
        Arc::new(authors.finish()),
        strings(|r| &r.document_type),
    ];

    Ok(RecordBatch::try_new(chunk_schema(dimension), columns)?)
}

pub(crate) fn column<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<T>())
        .ok_or_else(|| Error::Lance(format!("Missing or invalid column '{}'", name)))
}

/// Convert a full-width record batch (as returned by a scan) back to rows
pub fn batch_to_records(batch: &RecordBatch) -> Result<Vec<ChunkRecord>> {
    let ids = column::<StringArray>(batch, "id")?;
    let texts = column::<StringArray>(batch, "text")?;
    let vectors = column::<FixedSizeListArray>(batch, "vector")?;
    let pdf_ids = column::<Int64Array>(batch, "pdf_id")?;
    let sources = column::<StringArray>(batch, "source")?;
    let chunk_ids = column::<StringArray>(batch, "chunk_id")?;
    let pages = column::<Int64Array>(batch, "page")?;
    let batches = column::<StringArray>(batch, "batch")?;
    let indexes = column::<Int64Array>(batch, "index")?;
    let lengths = column::<Int64Array>(batch, "length")?;
    let timestamps = column::<Float64Array>(batch, "timestamp")?;
    let metadatas = column::<StringArray>(batch, "metadata")?;
    let years = column::<Int64Array>(batch, "publication_year")?;
    let authors = column::<ListArray>(batch, "authors")?;
    let document_types = column::<StringArray>(batch, "document_type")?;

    let mut records = Vec::with_capacity(batch.num_rows());
    for i in 0..batch.num_rows() {
        let vector = vectors.value(i);
        let vector = vector
            .as_any()
            .downcast_ref::<Float32Array>()
            .ok_or_else(|| Error::Lance("Invalid vector values".to_string()))?
            .values()
            .to_vec();

        let author_values = authors.value(i);
        let author_values = author_values
            .as_any()
            .downcast_ref::<StringArray>()
            .ok_or_else(|| Error::Lance("Invalid authors values".to_string()))?;
        let author_list = (0..author_values.len())
            .filter(|&j| author_values.is_valid(j))
            .map(|j| author_values.value(j).to_string())
            .collect();

        records.push(ChunkRecord {
            id: ids.value(i).to_string(),
            text: texts.value(i).to_string(),
            vector,
            pdf_id: pdf_ids.value(i),
            source: sources.value(i).to_string(),
            chunk_id: chunk_ids.value(i).to_string(),
            page: pages.value(i),
            batch: batches.value(i).to_string(),
            index: indexes.value(i),
            length: lengths.value(i),
            timestamp: timestamps.value(i),
            metadata: metadatas.value(i).to_string(),
            publication_year: years.value(i),
            authors: author_list,
            document_type: document_types.value(i).to_string(),
        });
    }

    Ok(records)
}
