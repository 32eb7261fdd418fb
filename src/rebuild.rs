//! Rebuild the vector index from the document catalog
//!
//! A rebuild only ever runs against an empty index. Every eligible document
//! is split, embedded and inserted on its own, so one bad document costs only
//! its own chunks.

use crate::catalog::{Catalog, Document};
use crate::chunk::split_text;
use crate::config::{ChunkConfig, Config};
use crate::embed::{embed_in_batches, Embedder, SharedEmbedder};
use crate::error::{Error, Result};
use crate::index::{ChunkMetadata, VectorBackend};
use chrono::Utc;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Outcome of one rebuild pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct RebuildStats {
    /// True when the index already had rows and nothing was done
    pub skipped_populated: bool,
    pub documents_scanned: usize,
    pub documents_indexed: usize,
    pub documents_skipped: usize,
    pub chunks_indexed: usize,
    pub errors: usize,
}

/// Fresh batch id for one rebuild pass
pub fn new_batch_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("rebuild-{}", &hex[..8])
}

/// Repopulates an empty index from the catalog
pub struct Reconciler {
    catalog: Catalog,
    embedder: Arc<SharedEmbedder>,
    chunk: ChunkConfig,
    batch_size: usize,
}

/// Chunks of one document ready for embedding
struct PreparedDocument {
    texts: Vec<String>,
    metadatas: Vec<ChunkMetadata>,
}

impl Reconciler {
    pub fn new(
        catalog: Catalog,
        embedder: Arc<SharedEmbedder>,
        chunk: ChunkConfig,
        batch_size: usize,
    ) -> Self {
        Self {
            catalog,
            embedder,
            chunk,
            batch_size,
        }
    }

    pub fn from_config(config: &Config, catalog: Catalog, embedder: Arc<SharedEmbedder>) -> Self {
        Self::new(
            catalog,
            embedder,
            config.chunk.clone(),
            config.embedding.batch_size,
        )
    }

    /// Run one rebuild pass against `backend`.
    ///
    /// Fails only when the catalog cannot be listed or the embedding model
    /// cannot be loaded; per-document failures are counted in the stats.
    pub async fn run(&self, backend: &dyn VectorBackend) -> Result<RebuildStats> {
        let mut stats = RebuildStats::default();

        let existing = backend.get_document_count().await;
        if existing > 0 {
            info!(rows = existing, "Vector index already populated; skipping rebuild");
            stats.skipped_populated = true;
            return Ok(stats);
        }

        let candidates = self.catalog.list_rebuild_candidates().await?;
        if candidates.is_empty() {
            info!("No catalog documents eligible for rebuild");
            return Ok(stats);
        }

        let embedder = self.embedder.get().await?;
        let batch_id = new_batch_id();
        let mut next_index: i64 = 0;

        info!(
            documents = candidates.len(),
            batch = %batch_id,
            backend = backend.name(),
            "Rebuilding vector index from catalog"
        );

        for doc in &candidates {
            stats.documents_scanned += 1;

            let prepared = match self.prepare_document(doc, &batch_id, next_index).await {
                Ok(prepared) => prepared,
                Err(e) => {
                    warn!(doc_id = doc.id, error = %e, "Failed to load document text for rebuild");
                    stats.errors += 1;
                    continue;
                }
            };

            if prepared.texts.is_empty() {
                debug!(doc_id = doc.id, "Document has no text to index");
                stats.documents_skipped += 1;
                continue;
            }

            let count = prepared.texts.len();
            match self.index_document(embedder.as_ref(), backend, prepared).await {
                Ok(()) => {
                    next_index += count as i64;
                    stats.documents_indexed += 1;
                    stats.chunks_indexed += count;
                    debug!(doc_id = doc.id, chunks = count, "Indexed document");
                }
                Err(e) => {
                    warn!(doc_id = doc.id, error = %e, "Failed to rebuild document");
                    stats.errors += 1;
                }
            }
        }

        info!(
            indexed = stats.documents_indexed,
            skipped = stats.documents_skipped,
            chunks = stats.chunks_indexed,
            errors = stats.errors,
            "Vector index rebuild finished"
        );

        Ok(stats)
    }

    async fn prepare_document(
        &self,
        doc: &Document,
        batch_id: &str,
        first_index: i64,
    ) -> Result<PreparedDocument> {
        let pages = self.catalog.get_page_texts(doc.id).await?;
        let authors = doc.authors();
        let document_type = doc.document_type.clone().unwrap_or_default();
        let mut prepared = PreparedDocument {
            texts: Vec::new(),
            metadatas: Vec::new(),
        };

        for page in &pages {
            let text = page.text.trim();
            if text.is_empty() {
                continue;
            }

            for chunk in split_text(text, &self.chunk) {
                let index = first_index + prepared.texts.len() as i64;
                prepared.metadatas.push(ChunkMetadata {
                    pdf_id: Some(doc.id),
                    source: Some(doc.filename.clone()),
                    chunk_id: Some(format!("{}_{}", batch_id, index)),
                    page: Some(page.page),
                    batch: Some(batch_id.to_string()),
                    index: Some(index),
                    length: Some(chunk.char_len() as i64),
                    timestamp: Some(Utc::now().timestamp_micros() as f64 / 1_000_000.0),
                    publication_year: Some(doc.publication_year.unwrap_or(0)),
                    authors: Some(authors.clone()),
                    document_type: Some(document_type.clone()),
                    extra: Default::default(),
                });
                prepared.texts.push(chunk.text);
            }
        }

        Ok(prepared)
    }

    async fn index_document(
        &self,
        embedder: &dyn Embedder,
        backend: &dyn VectorBackend,
        prepared: PreparedDocument,
    ) -> Result<()> {
        let embeddings =
            embed_in_batches(embedder, prepared.texts.clone(), self.batch_size).await?;

        if backend
            .add_documents(&prepared.texts, &embeddings, &prepared.metadatas)
            .await
        {
            Ok(())
        } else {
            Err(Error::Other(format!(
                "{} backend rejected {} chunks",
                backend.name(),
                prepared.texts.len()
            )))
        }
    }
}

/// Runs at most one background rebuild at a time for a backend
pub struct RebuildScheduler {
    reconciler: Option<Arc<Reconciler>>,
    running: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RebuildScheduler {
    /// A scheduler without a reconciler never starts a rebuild
    pub fn new(reconciler: Option<Arc<Reconciler>>) -> Self {
        Self {
            reconciler,
            running: Arc::new(AtomicBool::new(false)),
            task: Mutex::new(None),
        }
    }

    /// Spawn a rebuild of `backend` unless one is already running.
    ///
    /// The backend is held weakly until the task starts.
    pub async fn schedule(&self, backend: Weak<dyn VectorBackend>) {
        let Some(reconciler) = self.reconciler.clone() else {
            debug!("No reconciler configured; rebuild not scheduled");
            return;
        };

        let mut task = self.task.lock().await;
        if self.running.swap(true, Ordering::SeqCst) {
            debug!("Rebuild already running");
            return;
        }

        let guard = RunningGuard(Arc::clone(&self.running));
        *task = Some(tokio::spawn(async move {
            let _guard = guard;
            if let Some(backend) = backend.upgrade() {
                if let Err(e) = reconciler.run(&*backend).await {
                    error!(error = %e, "Background rebuild failed");
                }
            }
        }));
    }

    /// Abort a running rebuild and wait until it has stopped.
    ///
    /// Once this returns the aborted pass performs no further writes, so the
    /// index can be dropped and a fresh pass scheduled.
    pub async fn cancel(&self) {
        let mut task = self.task.lock().await;
        if let Some(handle) = task.take() {
            handle.abort();
            match handle.await {
                Ok(()) => {}
                Err(e) if e.is_cancelled() => info!("Cancelled running rebuild"),
                Err(e) => warn!(error = %e, "Rebuild task did not complete"),
            }
        }
        self.running.store(false, Ordering::SeqCst);
    }

    /// Wait for the most recently scheduled rebuild to finish
    pub async fn wait(&self) {
        let mut task = self.task.lock().await;
        if let Some(handle) = task.as_mut() {
            if let Err(e) = handle.await {
                warn!(error = %e, "Rebuild task did not complete");
            }
            *task = None;
        }
    }
}

/// Clears the running flag when a rebuild task ends or is aborted
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Document;
    use crate::embed::testing::{FlakyEmbedder, HashEmbedder, SlowEmbedder};
    use crate::index::lance::LanceBackend;
    use crate::index::Filter;
    use chrono::Duration;
    use tempfile::TempDir;

    const DIM: usize = 16;

    struct Fixture {
        catalog: Catalog,
        backend: Arc<LanceBackend>,
        _tmp: TempDir,
    }

    async fn fixture() -> Fixture {
        let tmp = TempDir::new().unwrap();
        let catalog = Catalog::open(&tmp.path().join("catalog.db")).await.unwrap();
        let backend = LanceBackend::open(&tmp.path().join("lance_db"), "pdf_documents", DIM, None)
            .await
            .unwrap();
        Fixture {
            catalog,
            backend,
            _tmp: tmp,
        }
    }

    fn reconciler(catalog: &Catalog, embedder: Arc<dyn Embedder>) -> Reconciler {
        Reconciler::new(
            catalog.clone(),
            Arc::new(SharedEmbedder::preloaded(embedder)),
            ChunkConfig {
                max_chars: 100,
                overlap_chars: 20,
            },
            4,
        )
    }

    async fn add_processed(catalog: &Catalog, filename: &str, pages: &[&str]) -> i64 {
        let mut doc = Document::new(filename);
        doc.publication_year = Some(2020);
        doc.document_type = Some("paper".to_string());
        doc.set_authors(&["Smith, John".to_string()]);
        let id = catalog.insert_document(&doc).await.unwrap();

        let written = Utc::now() - Duration::seconds(30);
        for (i, text) in pages.iter().enumerate() {
            catalog
                .upsert_page_text(id, i as i64 + 1, text, written)
                .await
                .unwrap();
        }
        catalog.mark_processed(id, Utc::now()).await.unwrap();
        id
    }

    #[test]
    fn test_batch_id_shape() {
        let id = new_batch_id();
        assert!(id.starts_with("rebuild-"));
        assert_eq!(id.len(), "rebuild-".len() + 8);
        assert_ne!(id, new_batch_id());
    }

    #[tokio::test]
    async fn test_rebuild_indexes_eligible_documents() {
        let fx = fixture().await;
        let long_page = "Sentence about retrieval. ".repeat(12);
        let first = add_processed(&fx.catalog, "a.pdf", &[&long_page, "   ", "Closing page."]).await;
        let blank = add_processed(&fx.catalog, "blank.pdf", &["  \n "]).await;

        let banned = add_processed(&fx.catalog, "banned.pdf", &["Never indexed."]).await;
        fx.catalog.set_blacklisted(banned, true).await.unwrap();

        let stale = add_processed(&fx.catalog, "stale.pdf", &["Old text."]).await;
        fx.catalog
            .upsert_page_text(stale, 1, "Regenerated text.", Utc::now() + Duration::seconds(30))
            .await
            .unwrap();

        let rec = reconciler(&fx.catalog, Arc::new(HashEmbedder { dimension: DIM }));
        let stats = rec.run(&*fx.backend).await.unwrap();

        assert!(!stats.skipped_populated);
        assert_eq!(stats.documents_scanned, 2);
        assert_eq!(stats.documents_indexed, 1);
        assert_eq!(stats.documents_skipped, 1);
        assert_eq!(stats.errors, 0);
        assert!(stats.chunks_indexed > 2);
        assert_eq!(fx.backend.get_document_count().await, stats.chunks_indexed);

        let query = HashEmbedder { dimension: DIM }.vector_for("Closing page.");
        let results = fx
            .backend
            .search(&query, 50, Some(&Filter::new().eq("pdf_id", first)), 0)
            .await;
        assert_eq!(results.len(), stats.chunks_indexed);

        let meta = &results.metadatas[0];
        assert_eq!(meta["source"], "a.pdf");
        assert_eq!(meta["publication_year"], 2020);
        assert_eq!(meta["document_type"], "paper");
        let batch = meta["batch"].as_str().unwrap();
        assert!(batch.starts_with("rebuild-"));
        let index = meta["index"].as_i64().unwrap();
        assert_eq!(meta["chunk_id"], format!("{}_{}", batch, index));

        let none = fx
            .backend
            .search(&query, 5, Some(&Filter::new().eq("pdf_id", blank)), 0)
            .await;
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_rebuild_is_noop_on_populated_index() {
        let fx = fixture().await;
        add_processed(&fx.catalog, "a.pdf", &["Some text to index."]).await;

        let rec = reconciler(&fx.catalog, Arc::new(HashEmbedder { dimension: DIM }));
        let first = rec.run(&*fx.backend).await.unwrap();
        assert_eq!(first.chunks_indexed, 1);

        add_processed(&fx.catalog, "b.pdf", &["More text."]).await;
        let second = rec.run(&*fx.backend).await.unwrap();
        assert!(second.skipped_populated);
        assert_eq!(second.documents_scanned, 0);
        assert_eq!(fx.backend.get_document_count().await, 1);
    }

    #[tokio::test]
    async fn test_failing_document_does_not_abort_rebuild() {
        let fx = fixture().await;
        add_processed(&fx.catalog, "good-1.pdf", &["First healthy document."]).await;
        add_processed(&fx.catalog, "bad.pdf", &["This one is POISON for the model."]).await;
        add_processed(&fx.catalog, "good-2.pdf", &["Second healthy document."]).await;

        let embedder = FlakyEmbedder {
            inner: HashEmbedder { dimension: DIM },
            poison: "POISON".to_string(),
        };
        let rec = reconciler(&fx.catalog, Arc::new(embedder));
        let stats = rec.run(&*fx.backend).await.unwrap();

        assert_eq!(stats.documents_scanned, 3);
        assert_eq!(stats.documents_indexed, 2);
        assert_eq!(stats.errors, 1);
        assert_eq!(fx.backend.get_document_count().await, 2);
    }

    #[tokio::test]
    async fn test_rebuild_with_empty_catalog() {
        let fx = fixture().await;
        let rec = reconciler(&fx.catalog, Arc::new(HashEmbedder { dimension: DIM }));

        let stats = rec.run(&*fx.backend).await.unwrap();
        assert_eq!(stats.documents_scanned, 0);
        assert_eq!(fx.backend.get_document_count().await, 0);
    }

    #[tokio::test]
    async fn test_open_and_reset_schedule_background_rebuild() {
        let tmp = TempDir::new().unwrap();
        let catalog = Catalog::open(&tmp.path().join("catalog.db")).await.unwrap();
        add_processed(&catalog, "a.pdf", &["Text that should come back after a reset."]).await;

        let rec = Arc::new(reconciler(&catalog, Arc::new(HashEmbedder { dimension: DIM })));
        let backend =
            LanceBackend::open(&tmp.path().join("lance_db"), "pdf_documents", DIM, Some(rec))
                .await
                .unwrap();
        backend.wait_for_rebuild().await;
        assert_eq!(backend.get_document_count().await, 1);

        assert!(backend.reset().await);
        backend.wait_for_rebuild().await;
        assert_eq!(backend.get_document_count().await, 1);
    }

    #[tokio::test]
    async fn test_reset_during_rebuild_restarts_from_scratch() {
        let tmp = TempDir::new().unwrap();
        let catalog = Catalog::open(&tmp.path().join("catalog.db")).await.unwrap();
        for i in 0..4 {
            add_processed(&catalog, &format!("doc-{i}.pdf"), &[&format!("Body of document {i}.")])
                .await;
        }

        let embedder = SlowEmbedder {
            inner: HashEmbedder { dimension: DIM },
            delay: std::time::Duration::from_millis(150),
        };
        let rec = Arc::new(reconciler(&catalog, Arc::new(embedder)));
        let backend =
            LanceBackend::open(&tmp.path().join("lance_db"), "pdf_documents", DIM, Some(rec))
                .await
                .unwrap();

        // Let the first pass write part of the index before resetting it.
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        assert!(backend.reset().await);
        backend.wait_for_rebuild().await;

        assert_eq!(backend.get_document_count().await, 4);
    }
}
