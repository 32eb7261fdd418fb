//! Qdrant-backed vector index
//!
//! Chunk records are stored as points whose payload mirrors the table
//! columns. Qdrant reports a native similarity score and supports payload
//! updates, so metadata sync rewrites payloads in place instead of deleting
//! and reinserting points.

use super::query::{assemble_page, RawHit, Window};
use super::record::{build_records, ChunkRecord};
use super::{settle, ChunkMetadata, Filter, FilterValue, SearchResults, TableState, VectorBackend};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::rebuild::{RebuildScheduler, Reconciler};
use async_trait::async_trait;
use qdrant_client::qdrant::value::Kind;
use qdrant_client::qdrant::{
    Condition, CountPointsBuilder, CreateCollectionBuilder, DeletePointsBuilder, Distance,
    Filter as QdrantFilter, GetCollectionInfoResponse, ListValue, PointId, PointStruct,
    PointsIdsList, Range, ScrollPointsBuilder, SearchPoints, SearchPointsBuilder,
    SetPayloadPoints, SetPayloadPointsBuilder, UpsertPointsBuilder, Value as QdrantValue,
    VectorParamsBuilder,
};
use qdrant_client::{Payload, Qdrant};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};
use uuid::Uuid;

const BACKEND_NAME: &str = "qdrant";
const SCROLL_PAGE: u32 = 256;

/// Vector index stored in a Qdrant collection
pub struct QdrantBackend {
    client: Qdrant,
    collection: String,
    dimension: usize,
    rebuild: RebuildScheduler,
    this: Weak<QdrantBackend>,
}

impl QdrantBackend {
    /// Connect to the server configured in `config`
    pub async fn from_config(
        config: &Config,
        reconciler: Option<Arc<Reconciler>>,
    ) -> Result<Arc<Self>> {
        Self::connect(
            &config.index.qdrant_url,
            &config.index.table_name,
            config.embedding.resolved_dimension(),
            reconciler,
        )
        .await
    }

    /// Connect and classify the collection, scheduling a rebuild when it is
    /// absent or empty
    pub async fn connect(
        url: &str,
        collection: &str,
        dimension: usize,
        reconciler: Option<Arc<Reconciler>>,
    ) -> Result<Arc<Self>> {
        let backend = Self::connect_lazy(url, collection, dimension, reconciler)?;

        let state = backend.state().await?;
        match state {
            TableState::Uninitialized => {
                info!("Qdrant collection not found; will be created on first insert")
            }
            TableState::CreatedEmpty => info!("Qdrant collection empty; scheduling rebuild"),
            TableState::Populated => debug!("Qdrant collection opened"),
        }

        if state.needs_rebuild() {
            backend.schedule_rebuild().await;
        }

        Ok(backend)
    }

    /// Build the client without contacting the server
    pub fn connect_lazy(
        url: &str,
        collection: &str,
        dimension: usize,
        reconciler: Option<Arc<Reconciler>>,
    ) -> Result<Arc<Self>> {
        debug!("Connecting to Qdrant at {}", url);

        let client = Qdrant::from_url(url)
            .skip_compatibility_check()
            .build()
            .map_err(|e| Error::Qdrant(e.to_string()))?;

        Ok(Arc::new_cyclic(|this| Self {
            client,
            collection: collection.to_string(),
            dimension,
            rebuild: RebuildScheduler::new(reconciler),
            this: this.clone(),
        }))
    }

    /// Current lifecycle state of the collection
    pub async fn state(&self) -> Result<TableState> {
        if !self.client.collection_exists(&self.collection).await? {
            return Ok(TableState::Uninitialized);
        }
        Ok(TableState::classify(true, self.count_points(None).await?))
    }

    /// Start a background rebuild unless one is already running
    pub async fn schedule_rebuild(&self) {
        let this: Weak<dyn VectorBackend> = self.this.clone();
        self.rebuild.schedule(this).await;
    }

    /// Ensure the collection exists with the expected vector size
    async fn ensure_collection(&self) -> Result<()> {
        if self.client.collection_exists(&self.collection).await? {
            let info = self.client.collection_info(&self.collection).await?;
            if let Some(size) = extract_vector_size(&info) {
                if size as usize != self.dimension {
                    return Err(Error::Qdrant(format!(
                        "Collection '{}' has vector size {}, but {} is configured. Use a new collection name or reset the index.",
                        self.collection, size, self.dimension
                    )));
                }
            }
            return Ok(());
        }

        info!(
            "Creating collection {} with dimension {}",
            self.collection, self.dimension
        );

        let vectors_config = VectorParamsBuilder::new(self.dimension as u64, Distance::Cosine);
        let created = self
            .client
            .create_collection(
                CreateCollectionBuilder::new(&self.collection).vectors_config(vectors_config),
            )
            .await;

        match created {
            Ok(_) => Ok(()),
            Err(e) if e.to_string().to_lowercase().contains("already exists") => {
                info!("Qdrant collection already existed; using existing collection");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn count_points(&self, filter: Option<QdrantFilter>) -> Result<usize> {
        let mut builder = CountPointsBuilder::new(&self.collection).exact(true);
        if let Some(filter) = filter {
            builder = builder.filter(filter);
        }
        let response = self.client.count(builder).await?;
        Ok(response.result.map(|r| r.count).unwrap_or(0) as usize)
    }

    async fn upsert_records(&self, records: Vec<ChunkRecord>) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let points = records_to_points(records, self.dimension)?;
        self.ensure_collection().await?;

        debug!(
            "Upserting {} points to collection {}",
            points.len(),
            self.collection
        );
        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection, points).wait(true))
            .await?;
        Ok(())
    }

    async fn try_add(
        &self,
        chunks: &[String],
        embeddings: &[Vec<f32>],
        metadatas: &[ChunkMetadata],
    ) -> Result<bool> {
        let records = build_records(chunks, embeddings, metadatas)?;
        self.upsert_records(records).await?;
        Ok(true)
    }

    async fn try_search(
        &self,
        query_embedding: &[f32],
        window: Window,
        filter: Option<&Filter>,
    ) -> Result<SearchResults> {
        if query_embedding.len() != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                actual: query_embedding.len(),
            });
        }

        if !self.client.collection_exists(&self.collection).await? {
            return Ok(SearchResults::empty());
        }
        if self.count_points(None).await? == 0 {
            return Ok(SearchResults::empty());
        }

        let request = search_request(&self.collection, query_embedding, window, filter);
        let response = self.client.search_points(request).await?;
        let hits = response
            .result
            .into_iter()
            .map(|p| hit_from_payload(point_id_to_string(p.id), &p.payload, Some(p.score)))
            .collect();

        Ok(assemble_page(hits, window))
    }

    async fn try_count(&self) -> Result<usize> {
        if !self.client.collection_exists(&self.collection).await? {
            return Ok(0);
        }
        self.count_points(None).await
    }

    async fn try_delete(&self, filter: Option<&Filter>, ids: Option<&[String]>) -> Result<bool> {
        if !self.client.collection_exists(&self.collection).await? {
            return Ok(true);
        }

        let builder = DeletePointsBuilder::new(&self.collection).wait(true);
        let builder = match (filter.and_then(to_qdrant_filter), ids) {
            (Some(filter), _) => builder.points(filter),
            (None, Some(ids)) if !ids.is_empty() => builder.points(point_ids(ids)),
            _ => return Ok(false),
        };

        self.client.delete_points(builder).await?;
        Ok(true)
    }

    async fn try_update_metadata(
        &self,
        pdf_id: i64,
        publication_year: Option<i64>,
        authors: Option<&[String]>,
        document_type: Option<&str>,
    ) -> Result<bool> {
        if !self.client.collection_exists(&self.collection).await? {
            warn!("Cannot update metadata: Qdrant collection not initialized");
            return Ok(false);
        }

        let filter = document_filter(pdf_id);
        let matching = self.count_points(Some(filter.clone())).await?;
        if matching == 0 {
            info!(pdf_id, "No chunks found for document, nothing to update");
            return Ok(true);
        }

        // Filterable columns for every chunk of the document in one request
        self.client
            .set_payload(column_update_request(
                &self.collection,
                pdf_id,
                publication_year,
                authors,
                document_type,
            ))
            .await?;

        // The JSON blob differs per chunk
        let mut offset: Option<PointId> = None;
        let mut rewritten = 0usize;
        loop {
            let mut builder = ScrollPointsBuilder::new(&self.collection)
                .filter(filter.clone())
                .limit(SCROLL_PAGE)
                .with_payload(true)
                .with_vectors(false);
            if let Some(ref o) = offset {
                builder = builder.offset(o.clone());
            }

            let response = self.client.scroll(builder).await?;
            for point in response.result {
                let Some(id) = point.id else { continue };
                self.client
                    .set_payload(blob_update_request(
                        &self.collection,
                        id,
                        &point.payload,
                        publication_year,
                        authors,
                        document_type,
                    ))
                    .await?;
                rewritten += 1;
            }

            offset = response.next_page_offset;
            if offset.is_none() {
                break;
            }
        }

        info!(
            pdf_id,
            points = matching,
            rewritten,
            "Updated document metadata in vector index"
        );
        Ok(true)
    }

    async fn try_reset(&self) -> Result<bool> {
        self.rebuild.cancel().await;

        if self.client.collection_exists(&self.collection).await? {
            info!("Deleting collection {}", self.collection);
            self.client.delete_collection(&self.collection).await?;
        }
        self.schedule_rebuild().await;
        Ok(true)
    }

    async fn try_replace(&self, delete_ids: &[String], records: Vec<ChunkRecord>) -> Result<bool> {
        check_dimensions(&records, self.dimension)?;

        if !delete_ids.is_empty() && self.client.collection_exists(&self.collection).await? {
            self.client
                .delete_points(
                    DeletePointsBuilder::new(&self.collection)
                        .points(point_ids(delete_ids))
                        .wait(true),
                )
                .await?;
        }
        self.upsert_records(records).await?;
        Ok(true)
    }
}

#[async_trait]
impl VectorBackend for QdrantBackend {
    fn name(&self) -> &'static str {
        BACKEND_NAME
    }

    async fn add_documents(
        &self,
        chunks: &[String],
        embeddings: &[Vec<f32>],
        metadatas: &[ChunkMetadata],
    ) -> bool {
        if chunks.is_empty() {
            return true;
        }
        let result = self.try_add(chunks, embeddings, metadatas).await;
        settle(BACKEND_NAME, "add_documents", result, false)
    }

    async fn search(
        &self,
        query_embedding: &[f32],
        n_results: i64,
        filter: Option<&Filter>,
        offset: i64,
    ) -> SearchResults {
        let window = Window::new(n_results, offset);
        if window.limit == 0 {
            return SearchResults::empty();
        }
        let result = self.try_search(query_embedding, window, filter).await;
        settle(BACKEND_NAME, "search", result, SearchResults::empty())
    }

    async fn get_document_count(&self) -> usize {
        let result = self.try_count().await;
        settle(BACKEND_NAME, "count", result, 0)
    }

    async fn delete(&self, filter: Option<&Filter>, ids: Option<&[String]>) -> bool {
        let has_filter = filter.map_or(false, |f| !f.is_empty());
        let has_ids = ids.map_or(false, |ids| !ids.is_empty());
        if !has_filter && !has_ids {
            warn!("Qdrant delete called without filter or ids");
            return false;
        }
        let result = self.try_delete(filter, ids).await;
        settle(BACKEND_NAME, "delete", result, false)
    }

    async fn update_document_metadata(
        &self,
        pdf_id: i64,
        publication_year: Option<i64>,
        authors: Option<&[String]>,
        document_type: Option<&str>,
    ) -> bool {
        let result = self
            .try_update_metadata(pdf_id, publication_year, authors, document_type)
            .await;
        settle(BACKEND_NAME, "update_document_metadata", result, false)
    }

    async fn reset(&self) -> bool {
        let result = self.try_reset().await;
        settle(BACKEND_NAME, "reset", result, false)
    }

    async fn replace_documents(&self, delete_ids: &[String], records: Vec<ChunkRecord>) -> bool {
        let result = self.try_replace(delete_ids, records).await;
        settle(BACKEND_NAME, "replace_documents", result, false)
    }

    async fn wait_for_rebuild(&self) {
        self.rebuild.wait().await;
    }
}

/// Stable point id for a chunk record id
pub fn point_id_for(record_id: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, record_id.as_bytes())
}

fn point_ids(record_ids: &[String]) -> Vec<PointId> {
    record_ids
        .iter()
        .map(|id| PointId::from(point_id_for(id).to_string()))
        .collect()
}

/// Convert rows to points, rejecting vectors of the wrong width
fn records_to_points(records: Vec<ChunkRecord>, dimension: usize) -> Result<Vec<PointStruct>> {
    check_dimensions(&records, dimension)?;

    Ok(records
        .into_iter()
        .map(|record| {
            let id = point_id_for(&record.id).to_string();
            let payload = record_payload(&record);
            PointStruct::new(id, record.vector, payload)
        })
        .collect())
}

fn check_dimensions(records: &[ChunkRecord], dimension: usize) -> Result<()> {
    match records.iter().find(|r| r.vector.len() != dimension) {
        Some(bad) => Err(Error::DimensionMismatch {
            expected: dimension,
            actual: bad.vector.len(),
        }),
        None => Ok(()),
    }
}

/// Payload mirroring every table column except the vector
fn record_payload(record: &ChunkRecord) -> HashMap<String, QdrantValue> {
    let mut map = HashMap::new();
    map.insert("id".to_string(), string_to_qdrant(&record.id));
    map.insert("text".to_string(), string_to_qdrant(&record.text));
    map.insert("pdf_id".to_string(), int_to_qdrant(record.pdf_id));
    map.insert("source".to_string(), string_to_qdrant(&record.source));
    map.insert("chunk_id".to_string(), string_to_qdrant(&record.chunk_id));
    map.insert("page".to_string(), int_to_qdrant(record.page));
    map.insert("batch".to_string(), string_to_qdrant(&record.batch));
    map.insert("index".to_string(), int_to_qdrant(record.index));
    map.insert("length".to_string(), int_to_qdrant(record.length));
    map.insert("timestamp".to_string(), float_to_qdrant(record.timestamp));
    map.insert("metadata".to_string(), string_to_qdrant(&record.metadata));
    map.insert(
        "publication_year".to_string(),
        int_to_qdrant(record.publication_year),
    );
    map.insert("authors".to_string(), list_to_qdrant(&record.authors));
    map.insert(
        "document_type".to_string(),
        string_to_qdrant(&record.document_type),
    );
    map
}

/// Metadata columns shared by every chunk of a document
fn column_payload(
    publication_year: Option<i64>,
    authors: Option<&[String]>,
    document_type: Option<&str>,
) -> HashMap<String, QdrantValue> {
    let mut map = HashMap::new();
    map.insert(
        "publication_year".to_string(),
        int_to_qdrant(publication_year.unwrap_or(0)),
    );
    map.insert("authors".to_string(), list_to_qdrant(authors.unwrap_or(&[])));
    map.insert(
        "document_type".to_string(),
        string_to_qdrant(document_type.unwrap_or("")),
    );
    map
}

/// The point's metadata blob with the document-level keys replaced
fn rewritten_blob(
    existing: &HashMap<String, QdrantValue>,
    publication_year: Option<i64>,
    authors: Option<&[String]>,
    document_type: Option<&str>,
) -> HashMap<String, QdrantValue> {
    let mut record = ChunkRecord {
        metadata: payload_string(existing, "metadata"),
        ..ChunkRecord::default()
    };
    record.rewrite_metadata(publication_year, authors, document_type);

    HashMap::from([("metadata".to_string(), string_to_qdrant(&record.metadata))])
}

/// Search for a result window, fetching one row past it
fn search_request(
    collection: &str,
    query_embedding: &[f32],
    window: Window,
    filter: Option<&Filter>,
) -> SearchPoints {
    let mut builder = SearchPointsBuilder::new(
        collection,
        query_embedding.to_vec(),
        window.fetch_total() as u64,
    )
    .with_payload(true);
    if let Some(filter) = filter.and_then(to_qdrant_filter) {
        builder = builder.filter(filter);
    }
    builder.build()
}

fn document_filter(pdf_id: i64) -> QdrantFilter {
    QdrantFilter::must([Condition::matches("pdf_id", pdf_id)])
}

/// Set the filterable columns on every point of `pdf_id`
fn column_update_request(
    collection: &str,
    pdf_id: i64,
    publication_year: Option<i64>,
    authors: Option<&[String]>,
    document_type: Option<&str>,
) -> SetPayloadPoints {
    let columns = column_payload(publication_year, authors, document_type);
    SetPayloadPointsBuilder::new(collection, Payload::from(columns))
        .points_selector(document_filter(pdf_id))
        .wait(true)
        .build()
}

/// Replace one point's metadata blob
fn blob_update_request(
    collection: &str,
    id: PointId,
    existing: &HashMap<String, QdrantValue>,
    publication_year: Option<i64>,
    authors: Option<&[String]>,
    document_type: Option<&str>,
) -> SetPayloadPoints {
    let blob = rewritten_blob(existing, publication_year, authors, document_type);
    SetPayloadPointsBuilder::new(collection, Payload::from(blob))
        .points_selector(PointsIdsList { ids: vec![id] })
        .wait(true)
        .build()
}

fn hit_from_payload(
    point_id: String,
    payload: &HashMap<String, QdrantValue>,
    score: Option<f32>,
) -> RawHit {
    let id = payload_string(payload, "id");
    RawHit {
        id: if id.is_empty() { point_id } else { id },
        text: payload_string(payload, "text"),
        metadata: payload_string(payload, "metadata"),
        score,
        distance: None,
    }
}

/// Equality filter as a Qdrant `must` filter, `None` when it has no clauses
fn to_qdrant_filter(filter: &Filter) -> Option<QdrantFilter> {
    if filter.is_empty() {
        return None;
    }

    let conditions: Vec<Condition> = filter
        .iter()
        .map(|(column, value)| match value {
            FilterValue::Str(s) => Condition::matches(column.as_str(), s.clone()),
            FilterValue::Int(i) => Condition::matches(column.as_str(), *i),
            FilterValue::Bool(b) => Condition::matches(column.as_str(), *b),
            FilterValue::Float(f) => Condition::range(
                column.as_str(),
                Range {
                    gte: Some(*f),
                    lte: Some(*f),
                    ..Default::default()
                },
            ),
        })
        .collect();

    Some(QdrantFilter::must(conditions))
}

fn extract_vector_size(info: &GetCollectionInfoResponse) -> Option<u64> {
    let result = info.result.as_ref()?;
    let config = result.config.as_ref()?;
    let params = config.params.as_ref()?;
    let vectors_config = params.vectors_config.as_ref()?;

    match vectors_config.config.as_ref()? {
        qdrant_client::qdrant::vectors_config::Config::Params(params) => Some(params.size),
        qdrant_client::qdrant::vectors_config::Config::ParamsMap(_) => None,
    }
}

fn payload_string(payload: &HashMap<String, QdrantValue>, key: &str) -> String {
    match payload.get(key).and_then(|v| v.kind.as_ref()) {
        Some(Kind::StringValue(s)) => s.clone(),
        _ => String::new(),
    }
}

/// Convert PointId to string
fn point_id_to_string(id: Option<PointId>) -> String {
    match id {
        Some(PointId {
            point_id_options: Some(qdrant_client::qdrant::point_id::PointIdOptions::Uuid(uuid)),
        }) => uuid,
        Some(PointId {
            point_id_options: Some(qdrant_client::qdrant::point_id::PointIdOptions::Num(num)),
        }) => num.to_string(),
        _ => String::new(),
    }
}

fn string_to_qdrant(s: &str) -> QdrantValue {
    QdrantValue {
        kind: Some(Kind::StringValue(s.to_string())),
    }
}

fn int_to_qdrant(i: i64) -> QdrantValue {
    QdrantValue {
        kind: Some(Kind::IntegerValue(i)),
    }
}

fn float_to_qdrant(f: f64) -> QdrantValue {
    QdrantValue {
        kind: Some(Kind::DoubleValue(f)),
    }
}

fn list_to_qdrant(items: &[String]) -> QdrantValue {
    QdrantValue {
        kind: Some(Kind::ListValue(ListValue {
            values: items.iter().map(|s| string_to_qdrant(s)).collect(),
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qdrant_client::qdrant::condition::ConditionOneOf;
    use qdrant_client::qdrant::points_selector::PointsSelectorOneOf;
    use qdrant_client::qdrant::r#match::MatchValue;

    fn sample_record() -> ChunkRecord {
        let meta = ChunkMetadata {
            pdf_id: Some(4),
            source: Some("paper.pdf".to_string()),
            chunk_id: Some("rebuild-0badf00d_3".to_string()),
            page: Some(2),
            index: Some(3),
            document_type: Some("paper".to_string()),
            authors: Some(vec!["Smith, John".to_string()]),
            ..Default::default()
        };
        ChunkRecord::build("chunk text", vec![0.1, 0.2, 0.3], &meta).unwrap()
    }

    #[test]
    fn test_point_ids_are_stable_and_distinct() {
        assert_eq!(point_id_for("doc_1_a"), point_id_for("doc_1_a"));
        assert_ne!(point_id_for("doc_1_a"), point_id_for("doc_1_b"));
        assert_eq!(point_ids(&["doc_1_a".to_string()]).len(), 1);
    }

    #[test]
    fn test_record_payload_mirrors_columns() {
        let record = sample_record();
        let payload = record_payload(&record);

        assert_eq!(payload.len(), 14);
        assert_eq!(payload_string(&payload, "id"), "doc_4_rebuild-0badf00d_3");
        assert_eq!(payload_string(&payload, "document_type"), "paper");
        assert!(matches!(
            payload["pdf_id"].kind,
            Some(Kind::IntegerValue(4))
        ));
        match &payload["authors"].kind {
            Some(Kind::ListValue(list)) => assert_eq!(list.values.len(), 1),
            other => panic!("expected list, got {other:?}"),
        }
    }

    #[test]
    fn test_hit_prefers_record_id_and_keeps_score() {
        let payload = record_payload(&sample_record());
        let hit = hit_from_payload("b3c1...".to_string(), &payload, Some(0.9));

        assert_eq!(hit.id, "doc_4_rebuild-0badf00d_3");
        assert_eq!(hit.text, "chunk text");
        assert_eq!(hit.score, Some(0.9));
        assert!(hit.distance.is_none());

        let bare = hit_from_payload("point-7".to_string(), &HashMap::new(), Some(0.1));
        assert_eq!(bare.id, "point-7");
        assert_eq!(bare.metadata, "");
    }

    #[test]
    fn test_metadata_edit_payloads() {
        let payload = record_payload(&sample_record());
        let authors = vec!["Doe, Jane".to_string()];

        let columns = column_payload(Some(2022), Some(&authors), Some("report"));
        assert_eq!(columns.len(), 3);
        assert_eq!(payload_string(&columns, "document_type"), "report");

        let cleared = column_payload(None, None, None);
        assert!(matches!(
            cleared["publication_year"].kind,
            Some(Kind::IntegerValue(0))
        ));
        assert_eq!(payload_string(&cleared, "document_type"), "");

        let blob = rewritten_blob(&payload, Some(2022), Some(&authors), Some("report"));
        let blob: serde_json::Value =
            serde_json::from_str(&payload_string(&blob, "metadata")).unwrap();
        assert_eq!(blob["publication_year"], 2022);
        assert_eq!(blob["document_type"], "report");
        assert_eq!(blob["source"], "paper.pdf");
    }

    #[test]
    fn test_filter_conversion() {
        let filter = Filter::new()
            .eq("document_type", "paper")
            .eq("pdf_id", 3i64)
            .eq("timestamp", 1.5f64);

        let qdrant_filter = to_qdrant_filter(&filter).unwrap();
        assert_eq!(qdrant_filter.must.len(), 3);
        assert!(to_qdrant_filter(&Filter::new()).is_none());
    }

    fn selector(request: &SetPayloadPoints) -> &PointsSelectorOneOf {
        request
            .points_selector
            .as_ref()
            .and_then(|s| s.points_selector_one_of.as_ref())
            .expect("request has a point selector")
    }

    #[test]
    fn test_search_request_fetches_window_plus_one() {
        let filter = Filter::new().eq("document_type", "paper").eq("publication_year", 2021i64);
        let request = search_request("chunks", &[0.1, 0.2, 0.3], Window::new(5, 10), Some(&filter));

        assert_eq!(request.collection_name, "chunks");
        assert_eq!(request.limit, 16);
        assert_eq!(request.vector, vec![0.1, 0.2, 0.3]);
        assert!(request.with_payload.is_some());
        assert_eq!(request.filter.map(|f| f.must.len()), Some(2));

        let unfiltered = search_request("chunks", &[0.1], Window::new(3, 0), Some(&Filter::new()));
        assert_eq!(unfiltered.limit, 4);
        assert!(unfiltered.filter.is_none());
    }

    #[test]
    fn test_column_update_targets_whole_document() {
        let authors = vec!["Doe, Jane".to_string()];
        let request = column_update_request("chunks", 7, Some(2022), Some(&authors), Some("report"));

        assert_eq!(request.collection_name, "chunks");
        assert_eq!(request.wait, Some(true));
        assert_eq!(request.payload.len(), 3);
        assert_eq!(payload_string(&request.payload, "document_type"), "report");

        let PointsSelectorOneOf::Filter(filter) = selector(&request) else {
            panic!("expected a filter selector");
        };
        assert_eq!(filter.must.len(), 1);
        match &filter.must[0].condition_one_of {
            Some(ConditionOneOf::Field(field)) => {
                assert_eq!(field.key, "pdf_id");
                let value = field.r#match.as_ref().and_then(|m| m.match_value.clone());
                assert_eq!(value, Some(MatchValue::Integer(7)));
            }
            other => panic!("expected a field condition, got {other:?}"),
        }
    }

    #[test]
    fn test_blob_update_targets_single_point() {
        let payload = record_payload(&sample_record());
        let id = PointId::from(point_id_for("doc_4_rebuild-0badf00d_3").to_string());
        let request = blob_update_request("chunks", id.clone(), &payload, None, None, Some("manual"));

        assert_eq!(request.wait, Some(true));
        assert_eq!(request.payload.len(), 1);
        let blob: serde_json::Value =
            serde_json::from_str(&payload_string(&request.payload, "metadata")).unwrap();
        assert_eq!(blob["document_type"], "manual");
        assert_eq!(blob["publication_year"], 0);
        assert_eq!(blob["source"], "paper.pdf");

        let PointsSelectorOneOf::Points(list) = selector(&request) else {
            panic!("expected a point id selector");
        };
        assert_eq!(list.ids, vec![id]);
    }

    #[tokio::test]
    async fn test_add_rejects_dimension_mismatch_before_contacting_server() {
        let backend = QdrantBackend::connect_lazy("http://127.0.0.1:6334", "test_collection", 4, None)
            .expect("client should build");

        let err = backend
            .try_add(&["text".to_string()], &[vec![0.1, 0.2]], &[])
            .await
            .expect_err("should reject mismatched vector length");

        match err {
            Error::DimensionMismatch { expected, actual } => {
                assert_eq!(expected, 4);
                assert_eq!(actual, 2);
            }
            other => panic!("expected dimension mismatch, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_delete_without_selector_is_invalid() {
        let backend = QdrantBackend::connect_lazy("http://127.0.0.1:6334", "test_collection", 4, None)
            .expect("client should build");

        assert!(!backend.delete(None, None).await);
        assert!(!backend.delete(Some(&Filter::new()), Some(&[])).await);
    }
}
