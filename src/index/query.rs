//! Result windowing and relevance normalisation
//!
//! Backends fetch one row more than the caller's window so that `has_more`
//! can be answered without a second count query.

use super::record::parse_metadata_blob;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Paged search results; the per-row vectors are parallel
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResults {
    pub ids: Vec<String>,
    pub documents: Vec<String>,
    pub metadatas: Vec<Map<String, Value>>,
    pub distances: Vec<f32>,
    pub scores: Vec<f32>,
    pub has_more: bool,
    pub offset: usize,
    pub limit: usize,
    pub total_fetched: usize,
}

impl SearchResults {
    /// The canonical shape for "nothing found"
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

/// A row as returned by a backend, before normalisation
#[derive(Debug, Clone, Default)]
pub struct RawHit {
    pub id: String,
    pub text: String,
    pub metadata: String,
    /// Native similarity score, when the backend reports one
    pub score: Option<f32>,
    /// Native distance, when the backend reports one
    pub distance: Option<f32>,
}

/// Requested window after clamping negative inputs to zero
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub limit: usize,
    pub offset: usize,
}

impl Window {
    pub fn new(n_results: i64, offset: i64) -> Self {
        Self {
            limit: n_results.max(0) as usize,
            offset: offset.max(0) as usize,
        }
    }

    /// Rows to fetch: the window plus one look-ahead row
    pub fn fetch_total(&self) -> usize {
        (self.limit + self.offset + 1).max(1)
    }
}

/// Rows to fetch for a request of `n_results` starting at `offset`
pub fn fetch_total(n_results: i64, offset: i64) -> usize {
    Window::new(n_results, offset).fetch_total()
}

/// Derive `(score, distance)` from whichever of the two the backend supplied.
///
/// A native score wins for the score and a native distance for the distance;
/// the missing one is the complement of the other.
pub fn normalize_relevance(score: Option<f32>, distance: Option<f32>) -> (f32, f32) {
    let score_value = match (score, distance) {
        (Some(s), _) => s.clamp(0.0, 1.0),
        (None, Some(d)) => (1.0 - d).clamp(0.0, 1.0),
        (None, None) => 0.0,
    };
    let distance_value = match distance {
        Some(d) => d.max(0.0),
        None => (1.0 - score_value).max(0.0),
    };
    (score_value, distance_value)
}

/// Cut the ordered hits down to the requested window
pub fn assemble_page(hits: Vec<RawHit>, window: Window) -> SearchResults {
    if window.limit == 0 {
        return SearchResults::empty();
    }

    let total_fetched = hits.len();
    let mut results = SearchResults {
        has_more: total_fetched > window.offset + window.limit,
        offset: window.offset,
        limit: window.limit,
        total_fetched,
        ..SearchResults::default()
    };

    for hit in hits.into_iter().skip(window.offset).take(window.limit) {
        let (score, distance) = normalize_relevance(hit.score, hit.distance);
        results.ids.push(hit.id);
        results.documents.push(hit.text);
        results.metadatas.push(parse_metadata_blob(&hit.metadata));
        results.scores.push(score);
        results.distances.push(distance);
    }

    results
}
