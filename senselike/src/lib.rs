//! SenseLike - "find documents similar to this one" over a Tantivy corpus
//!
//! A seed document is resolved from a base query, its term-frequency vector is
//! taken from a text field, the corpus is narrowed to a candidate set, and the
//! candidates are ranked by a weighted similarity query. Ranked lists are cached
//! per request fingerprint.
//!
//! Similarity is either literal term overlap or knowledge-base expansion of the
//! seed terms, selected per request.

pub mod cache;
pub mod config;
pub mod facets;
mod handler;
pub mod indexer;
pub mod interface;
pub mod reduction;
pub mod sense;
pub mod similarity;
pub mod stats;
pub mod term_vector;

pub use config::HandlerConfig;
pub use handler::{SenseLikeThis, RANKED_RESULT_CAP};
pub use indexer::{CorpusDocument, CorpusSchema, Indexer};
pub use interface::*;
pub use sense::KnowledgeBases;
pub use stats::StatsSnapshot;
