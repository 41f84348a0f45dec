//! Facet counts over a matched document set.

use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use tantivy::schema::{Field, Value};
use tantivy::{DocAddress, Searcher, TantivyDocument};

use crate::indexer::Indexer;
use crate::interface::{FacetCount, FacetParams, FieldFacets, SenseError};

/// Count keyword values of `params.fields` across `doc_set`.
///
/// Counts are ordered by count descending then value ascending, filtered by
/// `min_count` and truncated to `limit` (0 keeps everything).
pub fn facet_counts(
    indexer: &Indexer,
    searcher: &Searcher,
    doc_set: &HashSet<DocAddress>,
    params: &FacetParams,
) -> Result<Vec<FieldFacets>, SenseError> {
    let fields: Vec<Field> = params
        .fields
        .iter()
        .map(|name| {
            indexer
                .keyword_field(name)
                .ok_or_else(|| SenseError::FieldNotFound(format!("'{}' is not a facet field", name)))
        })
        .collect::<Result<_, _>>()?;
    if fields.is_empty() {
        return Ok(Vec::new());
    }

    let empty = || vec![HashMap::<String, u64>::new(); fields.len()];
    let tallies = doc_set
        .par_iter()
        .try_fold(empty, |mut tallies, address| {
            let doc: TantivyDocument = searcher.doc(*address)?;
            for (slot, field) in fields.iter().enumerate() {
                for value in doc.get_all(*field) {
                    if let Some(text) = value.as_str() {
                        *tallies[slot].entry(text.to_string()).or_insert(0) += 1;
                    }
                }
            }
            Ok::<_, tantivy::TantivyError>(tallies)
        })
        .try_reduce(empty, |mut left, right| {
            for (slot, counts) in right.into_iter().enumerate() {
                for (value, count) in counts {
                    *left[slot].entry(value).or_insert(0) += count;
                }
            }
            Ok(left)
        })?;

    Ok(params
        .fields
        .iter()
        .zip(tallies)
        .map(|(name, counts)| FieldFacets {
            field: name.clone(),
            counts: trim_counts(counts, params),
        })
        .collect())
}

fn trim_counts(counts: HashMap<String, u64>, params: &FacetParams) -> Vec<FacetCount> {
    let mut counts: Vec<FacetCount> = counts
        .into_iter()
        .filter(|(_, count)| *count >= params.min_count)
        .map(|(value, count)| FacetCount { value, count })
        .collect();
    counts.sort_unstable_by(|a, b| b.count.cmp(&a.count).then_with(|| a.value.cmp(&b.value)));
    if params.limit > 0 {
        counts.truncate(params.limit);
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::{CorpusDocument, CorpusSchema};
    use tantivy::collector::DocSetCollector;
    use tantivy::query::AllQuery;

    fn indexer() -> Indexer {
        let corpus = CorpusSchema::new("id")
            .with_text_field("content")
            .with_keyword_field("category")
            .with_keyword_field("tag");
        let indexer = Indexer::new_in_memory(corpus).unwrap();
        let docs = [
            ("a", "news", vec!["x", "y"]),
            ("b", "news", vec!["x"]),
            ("c", "sport", vec![]),
            ("d", "blog", vec!["y"]),
        ];
        for (key, category, tags) in docs {
            let mut doc = CorpusDocument::new(key).with("content", "text").with("category", category);
            for tag in tags {
                doc = doc.with("tag", tag);
            }
            indexer.add_document(&doc).unwrap();
        }
        indexer.commit().unwrap();
        indexer
    }

    fn all_docs(indexer: &Indexer) -> (Searcher, HashSet<DocAddress>) {
        let searcher = indexer.snapshot().searcher;
        let set = searcher.search(&AllQuery, &DocSetCollector).unwrap();
        (searcher, set)
    }

    #[test]
    fn test_counts_ordered_and_limited() {
        let indexer = indexer();
        let (searcher, set) = all_docs(&indexer);
        let params = FacetParams {
            fields: vec!["category".into(), "tag".into()],
            limit: 2,
            min_count: 1,
        };
        let facets = facet_counts(&indexer, &searcher, &set, &params).unwrap();

        assert_eq!(facets.len(), 2);
        assert_eq!(facets[0].field, "category");
        assert_eq!(
            facets[0].counts,
            vec![
                FacetCount { value: "news".into(), count: 2 },
                FacetCount { value: "blog".into(), count: 1 },
            ]
        );
        assert_eq!(
            facets[1].counts,
            vec![
                FacetCount { value: "x".into(), count: 2 },
                FacetCount { value: "y".into(), count: 2 },
            ]
        );
    }

    #[test]
    fn test_min_count_filters() {
        let indexer = indexer();
        let (searcher, set) = all_docs(&indexer);
        let params = FacetParams {
            fields: vec!["category".into()],
            limit: 0,
            min_count: 2,
        };
        let facets = facet_counts(&indexer, &searcher, &set, &params).unwrap();
        assert_eq!(facets[0].counts, vec![FacetCount { value: "news".into(), count: 2 }]);
    }

    #[test]
    fn test_non_keyword_field_rejected() {
        let indexer = indexer();
        let (searcher, set) = all_docs(&indexer);
        let params = FacetParams {
            fields: vec!["content".into()],
            ..FacetParams::default()
        };
        let err = facet_counts(&indexer, &searcher, &set, &params).unwrap_err();
        assert!(matches!(err, SenseError::FieldNotFound(_)));
    }

    #[test]
    fn test_empty_set_gives_empty_counts() {
        let indexer = indexer();
        let searcher = indexer.snapshot().searcher;
        let params = FacetParams {
            fields: vec!["category".into()],
            ..FacetParams::default()
        };
        let facets = facet_counts(&indexer, &searcher, &HashSet::new(), &params).unwrap();
        assert!(facets[0].counts.is_empty());
    }
}
