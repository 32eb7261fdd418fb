//! LanceDB-backed vector index
//!
//! One table at a local path. The table is created lazily on the first
//! insert and may be created concurrently by a background rebuild; both
//! writers converge on the same table.

use super::query::{assemble_page, RawHit, Window};
use super::record::{
    batch_to_records, build_records, chunk_schema, column, records_to_batch, ChunkRecord,
};
use super::{
    id_predicate, settle, ChunkMetadata, Filter, SearchResults, TableState, VectorBackend,
};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::rebuild::{RebuildScheduler, Reconciler};
use arrow_array::{Array, Float32Array, RecordBatch, RecordBatchIterator, StringArray};
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{Connection, DistanceType, Table};
use std::path::Path;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

const BACKEND_NAME: &str = "lance";

/// Vector index stored in a LanceDB table
pub struct LanceBackend {
    connection: Connection,
    table_name: String,
    dimension: usize,
    table: RwLock<Option<Table>>,
    rebuild: RebuildScheduler,
    this: Weak<LanceBackend>,
}

impl LanceBackend {
    /// Open the backend configured in `config`
    pub async fn from_config(
        config: &Config,
        reconciler: Option<Arc<Reconciler>>,
    ) -> Result<Arc<Self>> {
        Self::open(
            &config.index_path(),
            &config.index.table_name,
            config.embedding.resolved_dimension(),
            reconciler,
        )
        .await
    }

    /// Connect to the database at `path` and classify the table.
    ///
    /// When the table is absent or empty and a reconciler is given, a
    /// background rebuild is scheduled.
    pub async fn open(
        path: &Path,
        table_name: &str,
        dimension: usize,
        reconciler: Option<Arc<Reconciler>>,
    ) -> Result<Arc<Self>> {
        std::fs::create_dir_all(path)?;
        let uri = path.to_string_lossy().to_string();
        info!("Initializing LanceDB backend in {}", uri);

        let connection = lancedb::connect(&uri)
            .read_consistency_interval(Duration::ZERO)
            .execute()
            .await?;

        let backend = Arc::new_cyclic(|this| Self {
            connection,
            table_name: table_name.to_string(),
            dimension,
            table: RwLock::new(None),
            rebuild: RebuildScheduler::new(reconciler),
            this: this.clone(),
        });

        let table = backend.probe().await?;
        let rows = match &table {
            Some(table) => table.count_rows(None).await?,
            None => 0,
        };
        let state = TableState::classify(table.is_some(), rows);
        *backend.table.write().await = table;

        match state {
            TableState::Uninitialized => {
                info!("Lance table not found; will be created on first insert")
            }
            TableState::CreatedEmpty => info!("Lance table empty; scheduling rebuild"),
            TableState::Populated => debug!(rows, "Lance table opened"),
        }

        if state.needs_rebuild() {
            backend.schedule_rebuild().await;
        }

        Ok(backend)
    }

    /// Current lifecycle state of the table
    pub async fn state(&self) -> Result<TableState> {
        match self.current_table().await? {
            Some(table) => Ok(TableState::classify(true, table.count_rows(None).await?)),
            None => Ok(TableState::Uninitialized),
        }
    }

    /// Start a background rebuild unless one is already running
    pub async fn schedule_rebuild(&self) {
        let this: Weak<dyn VectorBackend> = self.this.clone();
        self.rebuild.schedule(this).await;
    }

    async fn probe(&self) -> Result<Option<Table>> {
        let names = self.connection.table_names().execute().await?;
        if !names.contains(&self.table_name) {
            return Ok(None);
        }
        let table = self.connection.open_table(&self.table_name).execute().await?;
        Ok(Some(table))
    }

    /// Cached table handle, re-probing when none is cached
    async fn current_table(&self) -> Result<Option<Table>> {
        if let Some(table) = self.table.read().await.clone() {
            return Ok(Some(table));
        }

        let mut slot = self.table.write().await;
        if slot.is_none() {
            *slot = self.probe().await?;
        }
        Ok(slot.clone())
    }

    /// Table handle, creating the table when it does not exist yet
    async fn ensure_table(&self) -> Result<Table> {
        if let Some(table) = self.table.read().await.clone() {
            return Ok(table);
        }

        let mut slot = self.table.write().await;
        if let Some(table) = slot.clone() {
            return Ok(table);
        }

        if let Some(table) = self.probe().await? {
            *slot = Some(table.clone());
            return Ok(table);
        }

        let schema = chunk_schema(self.dimension);
        let reader = RecordBatchIterator::new(
            vec![Ok(RecordBatch::new_empty(schema.clone()))],
            schema,
        );

        let table = match self
            .connection
            .create_table(&self.table_name, reader)
            .execute()
            .await
        {
            Ok(table) => {
                info!(table = %self.table_name, "Created Lance table");
                table
            }
            Err(e) if is_already_exists(&e) => {
                info!("Lance table already existed; opening existing table");
                self.connection
                    .open_table(&self.table_name)
                    .execute()
                    .await?
            }
            Err(e) => return Err(e.into()),
        };

        *slot = Some(table.clone());
        Ok(table)
    }

    async fn insert_records(&self, records: Vec<ChunkRecord>) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let batch = records_to_batch(&records, self.dimension)?;
        let table = self.ensure_table().await?;
        let schema = batch.schema();
        table
            .add(RecordBatchIterator::new(vec![Ok(batch)], schema))
            .execute()
            .await?;

        debug!(rows = records.len(), "Inserted chunk records");
        Ok(())
    }

    async fn try_add(
        &self,
        chunks: &[String],
        embeddings: &[Vec<f32>],
        metadatas: &[ChunkMetadata],
    ) -> Result<bool> {
        let records = build_records(chunks, embeddings, metadatas)?;
        self.insert_records(records).await?;
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

        let Some(table) = self.current_table().await? else {
            return Ok(SearchResults::empty());
        };
        if table.count_rows(None).await? == 0 {
            return Ok(SearchResults::empty());
        }

        let mut query = table
            .query()
            .nearest_to(query_embedding.to_vec())?
            .distance_type(DistanceType::Cosine)
            .limit(window.fetch_total());
        if let Some(predicate) = filter.map(Filter::to_predicate).transpose()?.flatten() {
            query = query.only_if(predicate);
        }

        let batches: Vec<RecordBatch> = query.execute().await?.try_collect().await?;

        let mut hits = Vec::new();
        for batch in &batches {
            hits.extend(hits_from_batch(batch)?);
        }

        Ok(assemble_page(hits, window))
    }

    async fn try_count(&self) -> Result<usize> {
        match self.current_table().await? {
            Some(table) => Ok(table.count_rows(None).await?),
            None => Ok(0),
        }
    }

    async fn try_delete(&self, predicate: &str) -> Result<bool> {
        let Some(table) = self.current_table().await? else {
            return Ok(true);
        };
        table.delete(predicate).await?;
        debug!(predicate, "Deleted chunk records");
        Ok(true)
    }

    /// Delete rows matching `predicate`, then insert `records`
    async fn try_replace_where(&self, predicate: &str, records: Vec<ChunkRecord>) -> Result<bool> {
        records_to_batch(&records, self.dimension)?;

        if let Some(table) = self.current_table().await? {
            table.delete(predicate).await?;
        }

        let count = records.len();
        if let Err(e) = self.insert_records(records).await {
            error!(
                rows = count,
                error = %e,
                "Chunks deleted but reinsert failed; a rebuild is needed to restore them"
            );
            return Err(e);
        }
        Ok(true)
    }

    async fn try_update_metadata(
        &self,
        pdf_id: i64,
        publication_year: Option<i64>,
        authors: Option<&[String]>,
        document_type: Option<&str>,
    ) -> Result<bool> {
        let Some(table) = self.current_table().await? else {
            warn!("Cannot update metadata: Lance table not initialized");
            return Ok(false);
        };

        let predicate = Filter::new()
            .eq("pdf_id", pdf_id)
            .to_predicate()?
            .ok_or_else(|| Error::Other("empty pdf_id predicate".to_string()))?;

        let rows = table.count_rows(Some(predicate.clone())).await?;
        if rows == 0 {
            info!(pdf_id, "No chunks found for document, nothing to update");
            return Ok(true);
        }

        info!(pdf_id, rows, "Updating metadata on document chunks");

        let batches: Vec<RecordBatch> = table
            .query()
            .only_if(predicate.clone())
            .limit(rows)
            .execute()
            .await?
            .try_collect()
            .await?;

        let mut records = Vec::with_capacity(rows);
        for batch in &batches {
            records.extend(batch_to_records(batch)?);
        }
        for record in &mut records {
            record.rewrite_metadata(publication_year, authors, document_type);
        }

        let ids: Vec<String> = records.iter().map(|r| r.id.clone()).collect();
        if !self.replace_documents(&ids, records).await {
            return Ok(false);
        }
        info!(pdf_id, "Updated document metadata in vector index");
        Ok(true)
    }

    async fn try_reset(&self) -> Result<bool> {
        self.rebuild.cancel().await;

        let names = self.connection.table_names().execute().await?;
        if names.contains(&self.table_name) {
            self.connection.drop_table(&self.table_name, &[]).await?;
            info!(table = %self.table_name, "Dropped Lance table");
        }
        *self.table.write().await = None;
        self.schedule_rebuild().await;
        Ok(true)
    }
}

/// Whether a create failed because another writer created the table first
fn is_already_exists(error: &lancedb::Error) -> bool {
    matches!(error, lancedb::Error::TableAlreadyExists { .. })
        || error.to_string().to_lowercase().contains("already exists")
}

fn hits_from_batch(batch: &RecordBatch) -> Result<Vec<RawHit>> {
    let ids = column::<StringArray>(batch, "id")?;
    let texts = column::<StringArray>(batch, "text")?;
    let metadatas = column::<StringArray>(batch, "metadata")?;
    let distances = batch
        .column_by_name("_distance")
        .and_then(|c| c.as_any().downcast_ref::<Float32Array>());

    Ok((0..batch.num_rows())
        .map(|i| RawHit {
            id: ids.value(i).to_string(),
            text: texts.value(i).to_string(),
            metadata: if metadatas.is_valid(i) {
                metadatas.value(i).to_string()
            } else {
                String::new()
            },
            score: None,
            distance: distances.filter(|d| d.is_valid(i)).map(|d| d.value(i)),
        })
        .collect())
}

#[async_trait]
impl VectorBackend for LanceBackend {
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
        let predicate = match filter.filter(|f| !f.is_empty()) {
            Some(filter) => filter.to_predicate(),
            None => Ok(ids.and_then(id_predicate)),
        };

        match predicate {
            Ok(Some(predicate)) => {
                let result = self.try_delete(&predicate).await;
                settle(BACKEND_NAME, "delete", result, false)
            }
            Ok(None) => {
                warn!("Lance delete called without filter or ids");
                false
            }
            Err(e) => settle(BACKEND_NAME, "delete", Err(e), false),
        }
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
        let result = match id_predicate(delete_ids) {
            Some(predicate) => self.try_replace_where(&predicate, records).await,
            None => self.insert_records(records).await.map(|_| true),
        };
        settle(BACKEND_NAME, "replace_documents", result, false)
    }

    async fn wait_for_rebuild(&self) {
        self.rebuild.wait().await;
    }
}
