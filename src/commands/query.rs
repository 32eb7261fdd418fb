//! Query command implementation

use crate::config::Config;
use crate::embed::SharedEmbedder;
use crate::error::{Error, Result};
use crate::extract::{check_publication_year, DocumentType};
use crate::index::{Filter, SearchResults, VectorBackend};
use serde::Serialize;
use tracing::{debug, info};

/// Query options
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Number of results to return
    pub limit: Option<usize>,
    /// Results to skip
    pub offset: usize,
    /// Only chunks of this document type
    pub document_type: Option<String>,
    /// Only chunks published in this year
    pub publication_year: Option<i64>,
    /// Only chunks of this document
    pub pdf_id: Option<i64>,
}

impl QueryOptions {
    /// Equality filter for the requested restrictions, `None` when unrestricted
    pub fn filter(&self) -> Result<Option<Filter>> {
        let mut filter = Filter::new();

        if let Some(document_type) = &self.document_type {
            let parsed: DocumentType = document_type.parse().map_err(Error::Other)?;
            filter = filter.eq("document_type", parsed.as_str());
        }
        if let Some(year) = self.publication_year {
            let year = check_publication_year(year).map_err(Error::Other)?;
            filter = filter.eq("publication_year", year);
        }
        if let Some(pdf_id) = self.pdf_id {
            filter = filter.eq("pdf_id", pdf_id);
        }

        Ok((!filter.is_empty()).then_some(filter))
    }
}

/// Query result for CLI display
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub query: String,
    #[serde(flatten)]
    pub results: SearchResults,
}

/// Execute a query
pub async fn cmd_query(
    config: &Config,
    embedder: &SharedEmbedder,
    backend: &dyn VectorBackend,
    query: &str,
    options: QueryOptions,
) -> Result<QueryResult> {
    info!("Querying: {}", query);

    let limit = options
        .limit
        .unwrap_or(config.query.default_limit)
        .min(config.query.max_limit);
    let filter = options.filter()?;
    let offset = i64::try_from(options.offset)
        .map_err(|_| Error::Other(format!("Offset {} is too large", options.offset)))?;

    let embedder = embedder.get().await?;
    let query_vector = embedder
        .embed(vec![query.to_string()])
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| Error::Embedding("No embedding returned".to_string()))?;

    let results = backend
        .search(
            &query_vector,
            limit as i64,
            filter.as_ref(),
            offset,
        )
        .await;
    debug!(
        "Got {} results (has_more: {})",
        results.len(),
        results.has_more
    );

    Ok(QueryResult {
        query: query.to_string(),
        results,
    })
}

/// Print query results to console
pub fn print_query_results(result: &QueryResult) {
    let results = &result.results;
    println!("\n🔍 Query: {}\n", result.query);
    println!("Found {} results:\n", results.len());

    for i in 0..results.len() {
        let metadata = &results.metadatas[i];
        let source = metadata
            .get("source")
            .and_then(|v| v.as_str())
            .unwrap_or(results.ids[i].as_str());

        println!(
            "{}. [score: {:.3}] {}",
            results.offset + i + 1,
            results.scores[i],
            source
        );

        if let Some(page) = metadata.get("page").and_then(|v| v.as_i64()) {
            println!("   Page: {}", page);
        }

        let text = results.documents[i].trim();
        let preview = if text.chars().count() > 200 {
            format!("{}...", text.chars().take(200).collect::<String>().trim())
        } else {
            text.to_string()
        };
        println!("   {}\n", preview.replace('\n', " "));
    }

    if results.has_more {
        println!(
            "More results available (use --offset {})",
            results.offset + results.limit
        );
    }
}
