//! Default values for configuration

/// Default index backend
pub fn default_index_backend() -> String {
    "lance".to_string()
}

/// Default table (or collection) name for chunk records
pub fn default_table_name() -> String {
    "pdf_documents".to_string()
}

/// Default Qdrant gRPC URL for local development (port 6334, not 6333 REST)
pub fn default_qdrant_url() -> String {
    "http://127.0.0.1:6334".to_string()
}

/// Schedule a rebuild when the index is found empty at startup
pub fn default_rebuild_on_start() -> bool {
    true
}

/// Default embedding model (sentence-transformers/all-MiniLM-L6-v2)
pub fn default_embedding_model() -> String {
    "sentence-transformers/all-MiniLM-L6-v2".to_string()
}

/// Default embedding dimension
pub fn default_embedding_dimension() -> usize {
    384
}

/// Default batch size for embedding
pub fn default_embedding_batch_size() -> usize {
    32
}

/// Default inference device
pub fn default_embedding_device() -> String {
    "cpu".to_string()
}

/// Default maximum characters per chunk
pub fn default_chunk_max_chars() -> usize {
    1000
}

/// Default overlap characters between chunks
pub fn default_chunk_overlap() -> usize {
    200
}

/// Default number of search results
pub fn default_query_limit() -> usize {
    5
}

/// Maximum search results per page
pub fn default_query_max_limit() -> usize {
    100
}
