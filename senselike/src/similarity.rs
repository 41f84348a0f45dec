//! Similarity query construction.
//!
//! The query is a disjunction of BM25 term queries, one per seed term, boosted by
//! the term's weight relative to the heaviest term. Related terms from the sense
//! strategy join the disjunction at `relative_weight · factor · sense_weight`, so
//! `sense_weight` scales the sense dimension against literal overlap.

use tantivy::query::{BooleanQuery, BoostQuery, ConstScoreQuery, Occur, Query, QueryClone, TermQuery, TermSetQuery};
use tantivy::schema::{Field, IndexRecordOption};
use tantivy::Term;

use crate::sense::SenseStrategy;
use crate::term_vector::TermWeightVector;

/// A rankable "documents like this vector" query.
#[derive(Debug)]
pub struct SimilarityQuery {
    query: Box<dyn Query>,
    literal_clauses: usize,
    sense_clauses: usize,
}

impl Clone for SimilarityQuery {
    fn clone(&self) -> Self {
        Self {
            query: self.query.box_clone(),
            literal_clauses: self.literal_clauses,
            sense_clauses: self.sense_clauses,
        }
    }
}

impl SimilarityQuery {
    pub fn query(&self) -> &dyn Query {
        self.query.as_ref()
    }

    pub fn literal_clauses(&self) -> usize {
        self.literal_clauses
    }

    pub fn sense_clauses(&self) -> usize {
        self.sense_clauses
    }

    /// True when the query cannot match anything.
    pub fn is_empty(&self) -> bool {
        self.literal_clauses + self.sense_clauses == 0
    }

    /// Restrict matches to documents whose unique key is in `keys`. The
    /// restriction contributes nothing to the score.
    pub fn restricted_to(&self, key_field: Field, keys: &[String]) -> Box<dyn Query> {
        let allowed = TermSetQuery::new(keys.iter().map(|key| Term::from_field_text(key_field, key)));
        Box::new(BooleanQuery::new(vec![
            (Occur::Must, self.query.box_clone()),
            (Occur::Must, Box::new(ConstScoreQuery::new(Box::new(allowed), 0.0))),
        ]))
    }
}

pub struct SimilarityQueryBuilder<'a> {
    field: Field,
    strategy: &'a dyn SenseStrategy,
    sense_weight: f32,
}

impl<'a> SimilarityQueryBuilder<'a> {
    pub fn new(field: Field, strategy: &'a dyn SenseStrategy, sense_weight: f32) -> Self {
        Self {
            field,
            strategy,
            sense_weight,
        }
    }

    pub fn build(&self, vector: &TermWeightVector) -> SimilarityQuery {
        let max_weight = vector.max_weight();
        let mut clauses: Vec<(Occur, Box<dyn Query>)> = Vec::new();
        let mut literal_clauses = 0;
        let mut sense_clauses = 0;

        if max_weight > 0.0 {
            for term_weight in vector.terms() {
                let relative = term_weight.weight / max_weight;
                clauses.push((Occur::Should, self.term_clause(&term_weight.term, relative)));
                literal_clauses += 1;

                if self.sense_weight <= 0.0 {
                    continue;
                }
                for (related, factor) in self.strategy.related_terms(&term_weight.term) {
                    let boost = relative * factor * self.sense_weight;
                    clauses.push((Occur::Should, self.term_clause(&related, boost)));
                    sense_clauses += 1;
                }
            }
        }

        SimilarityQuery {
            query: Box::new(BooleanQuery::new(clauses)),
            literal_clauses,
            sense_clauses,
        }
    }

    fn term_clause(&self, text: &str, boost: f32) -> Box<dyn Query> {
        let term = Term::from_field_text(self.field, text);
        Box::new(BoostQuery::new(
            Box::new(TermQuery::new(term, IndexRecordOption::WithFreqs)),
            boost,
        ))
    }
}
