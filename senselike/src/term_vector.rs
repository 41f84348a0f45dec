//! Term-weight vectors for seed documents.
//!
//! The vector is rebuilt from the stored field text using the analyzer the index
//! registered for that field, so extracted terms are exactly the indexed terms.

use std::collections::HashMap;

use tantivy::schema::Value;
use tantivy::tokenizer::TokenStream;
use tantivy::{DocAddress, Searcher, TantivyDocument};

use crate::indexer::Indexer;
use crate::interface::SenseError;

#[derive(Debug, Clone, PartialEq)]
pub struct TermWeight {
    pub term: String,
    pub weight: f32,
}

/// Weighted terms of one (document, field) pair, ordered by weight descending
/// then term text ascending.
#[derive(Debug, Clone, PartialEq)]
pub struct TermWeightVector {
    field: String,
    terms: Vec<TermWeight>,
}

impl TermWeightVector {
    pub fn from_weights(field: impl Into<String>, weights: impl IntoIterator<Item = (String, f32)>) -> Self {
        let mut terms: Vec<TermWeight> = weights
            .into_iter()
            .filter(|(_, weight)| *weight > 0.0)
            .map(|(term, weight)| TermWeight { term, weight })
            .collect();
        terms.sort_unstable_by(|a, b| b.weight.total_cmp(&a.weight).then_with(|| a.term.cmp(&b.term)));
        Self {
            field: field.into(),
            terms,
        }
    }

    pub fn empty(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            terms: Vec::new(),
        }
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn terms(&self) -> &[TermWeight] {
        &self.terms
    }

    /// The `n` highest-weighted terms.
    pub fn top(&self, n: usize) -> &[TermWeight] {
        &self.terms[..n.min(self.terms.len())]
    }

    pub fn max_weight(&self) -> f32 {
        self.terms.first().map_or(0.0, |t| t.weight)
    }

    pub fn weight_of(&self, term: &str) -> Option<f32> {
        self.terms.iter().find(|t| t.term == term).map(|t| t.weight)
    }
}

/// Build the term-frequency vector of `address` in `field_name`.
///
/// Fails with `FieldNotFound` when the field is not a stored text field of the
/// corpus. A document without text in the field yields an empty vector.
pub fn extract(
    indexer: &Indexer,
    searcher: &Searcher,
    address: DocAddress,
    field_name: &str,
) -> Result<TermWeightVector, SenseError> {
    let field = indexer
        .text_field(field_name)
        .ok_or_else(|| SenseError::FieldNotFound(field_name.to_string()))?;
    let mut analyzer = indexer.index().tokenizer_for_field(field)?;

    let doc: TantivyDocument = searcher.doc(address)?;
    let mut counts: HashMap<String, u32> = HashMap::new();
    for value in doc.get_all(field) {
        let Some(text) = value.as_str() else { continue };
        let mut stream = analyzer.token_stream(text);
        while let Some(token) = stream.next() {
            *counts.entry(token.text.clone()).or_insert(0) += 1;
        }
    }

    Ok(TermWeightVector::from_weights(
        field_name,
        counts.into_iter().map(|(term, count)| (term, count as f32)),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::{CorpusDocument, CorpusSchema};

    fn indexer_with(docs: &[(&str, &str)]) -> Indexer {
        let corpus = CorpusSchema::new("id")
            .with_text_field("content")
            .with_text_field("title")
            .with_keyword_field("category");
        let indexer = Indexer::new_in_memory(corpus).unwrap();
        for (key, content) in docs {
            indexer.add_document(&CorpusDocument::new(*key).with("content", *content)).unwrap();
        }
        indexer.commit().unwrap();
        indexer
    }

    #[test]
    fn test_ordering_by_weight_then_term() {
        let vector = TermWeightVector::from_weights(
            "content",
            vec![
                ("beta".to_string(), 2.0),
                ("alpha".to_string(), 2.0),
                ("gamma".to_string(), 5.0),
                ("zero".to_string(), 0.0),
            ],
        );
        let terms: Vec<&str> = vector.terms().iter().map(|t| t.term.as_str()).collect();
        assert_eq!(terms, vec!["gamma", "alpha", "beta"]);
        assert_eq!(vector.max_weight(), 5.0);
        assert_eq!(vector.top(2).len(), 2);
        assert_eq!(vector.top(10).len(), 3);
    }

    #[test]
    fn test_extract_counts_analyzed_terms() {
        let indexer = indexer_with(&[("seed", "Alpha alpha ALPHA beta")]);
        let snapshot = indexer.snapshot();
        let address = indexer.find_by_key(&snapshot.searcher, "seed").unwrap().unwrap();

        let vector = extract(&indexer, &snapshot.searcher, address, "content").unwrap();
        assert_eq!(vector.len(), 2);
        assert_eq!(vector.weight_of("alpha"), Some(3.0));
        assert_eq!(vector.weight_of("beta"), Some(1.0));
        assert_eq!(vector.terms()[0].term, "alpha");
    }

    #[test]
    fn test_extract_empty_field_is_empty_vector() {
        let indexer = indexer_with(&[("seed", "some words")]);
        let snapshot = indexer.snapshot();
        let address = indexer.find_by_key(&snapshot.searcher, "seed").unwrap().unwrap();

        let vector = extract(&indexer, &snapshot.searcher, address, "title").unwrap();
        assert!(vector.is_empty());
        assert_eq!(vector.max_weight(), 0.0);
    }

    #[test]
    fn test_extract_unknown_field() {
        let indexer = indexer_with(&[("seed", "some words")]);
        let snapshot = indexer.snapshot();
        let address = indexer.find_by_key(&snapshot.searcher, "seed").unwrap().unwrap();

        for field in ["missing", "category", "id"] {
            let err = extract(&indexer, &snapshot.searcher, address, field).unwrap_err();
            assert!(matches!(err, SenseError::FieldNotFound(_)), "field {field}: {err:?}");
        }
    }
}
