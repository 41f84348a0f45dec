//! SenseLike Interface Definition
//!
//! Request, response and error types shared by the handler, the CLI and any
//! embedding service. This file is the source of truth for the caller contract.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::stats::StatsSnapshot;

// ═══════════════════════════════════════════════════════════════════════════════
// ENUMS
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error category.
///
/// `BadRequest` means "fix your query", `SeedNotFound` means the base query
/// matched nothing, `ServerError` means the failure is on our side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    BadRequest,
    SeedNotFound,
    ServerError,
}

/// Facet section of a response.
///
/// Serialized as `null` when facets were requested over a degenerate match and
/// omitted entirely when they were not requested.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(untagged)]
pub enum Facets {
    #[default]
    NotRequested,
    Absent,
    Counts(Vec<FieldFacets>),
}

impl Facets {
    pub fn is_not_requested(&self) -> bool {
        matches!(self, Facets::NotRequested)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// REQUEST
// ═══════════════════════════════════════════════════════════════════════════════

/// Facet parameters: which keyword fields to count and how to trim the counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FacetParams {
    pub fields: Vec<String>,
    /// Maximum values reported per field; 0 reports every value.
    pub limit: usize,
    pub min_count: u64,
}

impl Default for FacetParams {
    fn default() -> Self {
        Self {
            fields: Vec::new(),
            limit: 100,
            min_count: 1,
        }
    }
}

/// Which debug sections to emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugOptions {
    pub query: bool,
    pub results: bool,
}

impl DebugOptions {
    pub fn all() -> Self {
        Self { query: true, results: true }
    }

    pub fn enabled(&self) -> bool {
        self.query || self.results
    }
}

/// A "more like this" request.
///
/// Options left as `None` fall back to the handler's [`HandlerConfig`](crate::config::HandlerConfig).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimilarityRequest {
    /// Base query resolving the seed document.
    pub q: Option<String>,
    /// Filter queries applied to the candidate pool.
    pub filters: Vec<String>,
    /// Text field the term vector is taken from and ranked against.
    pub field: Option<String>,
    /// Knowledge-base id selecting the sense strategy.
    pub knowledge_base: Option<String>,
    pub weight: Option<f32>,
    pub num_terms_to_use: Option<usize>,
    pub threshold: Option<f32>,
    pub max_candidate_set_size: Option<usize>,
    pub min_doc_set_size_for_filter: Option<usize>,
    /// Which hit of the base query becomes the seed.
    pub match_offset: usize,
    pub start: usize,
    pub rows: Option<usize>,
    /// Echo the seed document in the response.
    pub include_match: bool,
    pub include_score: bool,
    pub facets: Option<FacetParams>,
    pub debug: DebugOptions,
}

impl Default for SimilarityRequest {
    fn default() -> Self {
        Self {
            q: None,
            filters: Vec::new(),
            field: None,
            knowledge_base: None,
            weight: None,
            num_terms_to_use: None,
            threshold: None,
            max_candidate_set_size: None,
            min_doc_set_size_for_filter: None,
            match_offset: 0,
            start: 0,
            rows: None,
            include_match: true,
            include_score: false,
            facets: None,
            debug: DebugOptions::default(),
        }
    }
}

impl SimilarityRequest {
    pub fn new(q: impl Into<String>) -> Self {
        Self {
            q: Some(q.into()),
            ..Self::default()
        }
    }

    pub fn with_window(mut self, start: usize, rows: usize) -> Self {
        self.start = start;
        self.rows = Some(rows);
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filters.push(filter.into());
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RESPONSE
// ═══════════════════════════════════════════════════════════════════════════════

/// The seed document echoed back to the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeedMatch {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
}

/// One similar document in the result window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarDoc {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
}

/// Paginated slice of the ranked similarity results.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultWindow {
    /// Number of documents the similarity query matched, before the ranking cap.
    pub num_found: u64,
    pub start: usize,
    pub docs: Vec<SimilarDoc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FacetCount {
    pub value: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldFacets {
    pub field: String,
    pub counts: Vec<FacetCount>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocExplanation {
    pub key: String,
    pub explanation: String,
}

/// Debug block; counters are zero when the result was served from cache.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct DebugInfo {
    pub raw_query: String,
    pub parsed_query: String,
    pub filter_queries: Vec<String>,
    pub parsed_filter_queries: Vec<String>,
    pub fingerprint: String,
    pub cache_hit: bool,
    pub terms_considered: usize,
    pub terms_used: usize,
    pub pool_size: u64,
    pub filtered_out: u64,
    pub candidate_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explain: Option<Vec<DocExplanation>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exception_during_debug: Option<String>,
}

/// Complete response to a similarity request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarityResponse {
    #[serde(rename = "match", skip_serializing_if = "Option::is_none")]
    pub seed: Option<SeedMatch>,
    pub response: ResultWindow,
    #[serde(skip_serializing_if = "Facets::is_not_requested")]
    pub facet_counts: Facets,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug: Option<DebugInfo>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// ERRORS
// ═══════════════════════════════════════════════════════════════════════════════

/// Error type for SenseLike operations
#[derive(Debug, Error)]
pub enum SenseError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Query parse error: {0}")]
    QueryParse(#[from] tantivy::query::QueryParserError),
    #[error("Field not found: {0}")]
    FieldNotFound(String),
    #[error("No document found matching request")]
    SeedNotFound,
    #[error("Index error: {0}")]
    Index(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl SenseError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SenseError::InvalidInput(_) | SenseError::QueryParse(_) | SenseError::FieldNotFound(_) => {
                ErrorKind::BadRequest
            }
            SenseError::SeedNotFound => ErrorKind::SeedNotFound,
            SenseError::Index(_) | SenseError::Serialization(_) | SenseError::Runtime(_) => {
                ErrorKind::ServerError
            }
        }
    }

    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

/// Structured error body returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorResponse {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<tantivy::TantivyError> for SenseError {
    fn from(e: tantivy::TantivyError) -> Self {
        SenseError::Index(e.to_string())
    }
}

impl From<crate::indexer::IndexerError> for SenseError {
    fn from(e: crate::indexer::IndexerError) -> Self {
        SenseError::Index(e.to_string())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SERVICE INTERFACE
// ═══════════════════════════════════════════════════════════════════════════════

/// The primary interface for similarity retrieval.
#[async_trait::async_trait]
pub trait SenseLikeThisApi: Send + Sync {
    /// Find documents similar to the seed resolved by `request.q`.
    async fn similar(&self, request: SimilarityRequest) -> Result<SimilarityResponse, SenseError>;

    /// Cumulative handler statistics since process start.
    fn statistics(&self) -> StatsSnapshot;
}
