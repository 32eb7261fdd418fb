//! pdfrag: vector index for a PDF retrieval service
//!
//! A document catalog in SQLite is the source of truth; the vector index
//! (LanceDB table or Qdrant collection) is derived from it and rebuilt from
//! the catalog whenever it is found absent or empty.

pub mod archive;
pub mod catalog;
pub mod chunk;
pub mod commands;
pub mod config;
pub mod embed;
pub mod error;
pub mod extract;
pub mod index;
pub mod rebuild;
