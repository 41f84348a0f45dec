//! Query reduction filter.
//!
//! Narrows the corpus to the documents worth ranking. The pool is every document
//! that passes the caller's filters minus the seed. Small pools are used as-is;
//! larger ones are reduced to documents that accumulate enough weight from the
//! seed's top terms:
//!
//! ```text
//! score(doc) = Σ over top terms t, expansions (e, f) of t, doc ∋ e:
//!                  weight(t) · f · idf(e)
//! idf(e)     = 1 + ln(num_docs / (doc_freq(e) + 1))
//! ```
//!
//! Survivors are ordered by score descending, then doc address ascending, and
//! capped at `max_candidate_set_size`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tantivy::collector::{Count, DocSetCollector};
use tantivy::query::{AllQuery, BooleanQuery, Occur, Query, QueryClone, TermQuery};
use tantivy::schema::{Field, IndexRecordOption};
use tantivy::{DocAddress, Searcher, Term};
use tracing::debug;

use crate::config::{
    DEFAULT_MAX_CANDIDATE_SET_SIZE, DEFAULT_MIN_DOC_SET_SIZE_FOR_FILTER, DEFAULT_NUM_TERMS_TO_USE,
    DEFAULT_THRESHOLD,
};
use crate::indexer::Indexer;
use crate::interface::SenseError;
use crate::sense::SenseStrategy;
use crate::term_vector::TermWeightVector;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReductionConfig {
    pub num_terms_to_use: usize,
    pub threshold: f32,
    pub max_candidate_set_size: usize,
    pub min_doc_set_size_for_filter: usize,
}

impl Default for ReductionConfig {
    fn default() -> Self {
        Self {
            num_terms_to_use: DEFAULT_NUM_TERMS_TO_USE,
            threshold: DEFAULT_THRESHOLD,
            max_candidate_set_size: DEFAULT_MAX_CANDIDATE_SET_SIZE,
            min_doc_set_size_for_filter: DEFAULT_MIN_DOC_SET_SIZE_FOR_FILTER,
        }
    }
}

/// Documents selected for similarity ranking.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CandidateSet {
    docs: Vec<DocAddress>,
    keys: Vec<String>,
    /// Documents passing the caller's filters, seed excluded.
    pub pool_size: u64,
    /// Pool documents that did not make it into the set.
    pub filtered_out: u64,
    /// Seed terms that took part in the reduction (0 when it was skipped).
    pub terms_used: usize,
    /// False when the pool was small enough to be used unreduced.
    pub reduced: bool,
}

impl CandidateSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn docs(&self) -> &[DocAddress] {
        &self.docs
    }

    /// Unique keys, parallel to `docs()`.
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.keys.iter().any(|k| k == key)
    }
}

/// The candidate pool: all documents, restricted by `filters`, minus `excluded`.
pub fn pool_query(filters: &[Box<dyn Query>], excluded: Option<Term>) -> Box<dyn Query> {
    let mut clauses: Vec<(Occur, Box<dyn Query>)> = vec![(Occur::Must, Box::new(AllQuery))];
    clauses.extend(filters.iter().map(|f| (Occur::Must, f.box_clone())));
    if let Some(term) = excluded {
        clauses.push((Occur::MustNot, Box::new(TermQuery::new(term, IndexRecordOption::Basic))));
    }
    Box::new(BooleanQuery::new(clauses))
}

fn idf(doc_freq: u64, num_docs: u64) -> f32 {
    1.0 + (num_docs as f32 / (doc_freq as f32 + 1.0)).ln()
}

pub struct CandidateReducer<'a> {
    indexer: &'a Indexer,
    searcher: &'a Searcher,
    field: Field,
    strategy: &'a dyn SenseStrategy,
    config: &'a ReductionConfig,
}

impl<'a> CandidateReducer<'a> {
    pub fn new(
        indexer: &'a Indexer,
        searcher: &'a Searcher,
        field: Field,
        strategy: &'a dyn SenseStrategy,
        config: &'a ReductionConfig,
    ) -> Self {
        Self {
            indexer,
            searcher,
            field,
            strategy,
            config,
        }
    }

    pub fn reduce(&self, vector: &TermWeightVector, pool: &dyn Query) -> Result<CandidateSet, SenseError> {
        if vector.is_empty() {
            return Ok(CandidateSet::empty());
        }

        let pool_size = self.searcher.search(pool, &Count)? as u64;
        if pool_size < self.config.min_doc_set_size_for_filter as u64 {
            debug!(pool_size, "pool below reduction minimum, using it unreduced");
            let mut docs: Vec<DocAddress> = self.searcher.search(pool, &DocSetCollector)?.into_iter().collect();
            docs.sort_unstable();
            docs.truncate(self.config.max_candidate_set_size);
            return self.finish(docs, pool_size, 0, false);
        }

        let top_terms = vector.top(self.config.num_terms_to_use);
        let num_docs = self.searcher.num_docs();
        let mut scores: HashMap<DocAddress, f32> = HashMap::new();

        for term_weight in top_terms {
            for (text, factor) in self.strategy.expand(&term_weight.term) {
                let term = Term::from_field_text(self.field, &text);
                let doc_freq = self.searcher.doc_freq(&term)?;
                if doc_freq == 0 {
                    continue;
                }
                let contribution = term_weight.weight * factor * idf(doc_freq, num_docs);

                let in_pool = BooleanQuery::new(vec![
                    (Occur::Must, Box::new(TermQuery::new(term, IndexRecordOption::Basic)) as Box<dyn Query>),
                    (Occur::Must, pool.box_clone()),
                ]);
                for address in self.searcher.search(&in_pool, &DocSetCollector)? {
                    *scores.entry(address).or_insert(0.0) += contribution;
                }
            }
        }

        let mut kept: Vec<(DocAddress, f32)> = scores
            .into_iter()
            .filter(|(_, score)| *score >= self.config.threshold)
            .collect();
        kept.sort_unstable_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        kept.truncate(self.config.max_candidate_set_size);

        let docs = kept.into_iter().map(|(address, _)| address).collect();
        self.finish(docs, pool_size, top_terms.len(), true)
    }

    fn finish(
        &self,
        docs: Vec<DocAddress>,
        pool_size: u64,
        terms_used: usize,
        reduced: bool,
    ) -> Result<CandidateSet, SenseError> {
        let fast_keys = self.indexer.fast_keys(self.searcher, &docs)?;
        let mut kept_docs = Vec::with_capacity(docs.len());
        let mut keys = Vec::with_capacity(docs.len());
        for (address, key) in docs.into_iter().zip(fast_keys) {
            if let Some(key) = key {
                kept_docs.push(address);
                keys.push(key);
            }
        }
        Ok(CandidateSet {
            filtered_out: pool_size.saturating_sub(kept_docs.len() as u64),
            docs: kept_docs,
            keys,
            pool_size,
            terms_used,
            reduced,
        })
    }
}
