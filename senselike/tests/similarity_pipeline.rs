//! End-to-end tests of the similarity pipeline against an on-disk index.
//!
//! Reference corpus (key, content, category):
//! - seed: "alpha alpha alpha beta" (a)
//! - d1:   "alpha gamma"            (a)
//! - d2:   "alpha beta"             (b)
//! - d3:   "beta gamma"             (a)
//! - d4:   "delta epsilon"          (b)

use senselike::interface::{DebugOptions, ErrorKind, FacetCount, FacetParams, Facets};
use senselike::sense::KnowledgeBase;
use senselike::{
    CorpusDocument, CorpusSchema, HandlerConfig, Indexer, KnowledgeBases, SenseLikeThis, SenseLikeThisApi,
    SimilarityRequest, SimilarityResponse,
};
use std::io::Write;
use std::sync::Arc;
use tempfile::TempDir;

const REFERENCE_DOCS: &[(&str, &str, &str)] = &[
    ("seed", "alpha alpha alpha beta", "a"),
    ("d1", "alpha gamma", "a"),
    ("d2", "alpha beta", "b"),
    ("d3", "beta gamma", "a"),
    ("d4", "delta epsilon", "b"),
];

fn corpus() -> CorpusSchema {
    CorpusSchema::new("id")
        .with_text_field("content")
        .with_keyword_field("category")
}

/// Helper to create a handler over an on-disk index holding `docs`
fn create_handler(docs: &[(&str, &str, &str)], knowledge_bases: KnowledgeBases) -> (SenseLikeThis, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let indexer = Indexer::new(&temp_dir.path().join("index"), corpus()).unwrap();
    for (key, content, category) in docs {
        let mut doc = CorpusDocument::new(*key).with("category", *category);
        if !content.is_empty() {
            doc = doc.with("content", *content);
        }
        indexer.add_document(&doc).unwrap();
    }
    indexer.commit().unwrap();

    let handler = SenseLikeThis::new(Arc::new(indexer), HandlerConfig::default(), knowledge_bases);
    (handler, temp_dir)
}

fn reference_handler() -> (SenseLikeThis, TempDir) {
    create_handler(REFERENCE_DOCS, KnowledgeBases::new())
}

/// Reduction tuned so only documents sharing the seed's heaviest term survive
fn reduced_request() -> SimilarityRequest {
    SimilarityRequest {
        num_terms_to_use: Some(1),
        threshold: Some(2.0),
        max_candidate_set_size: Some(10),
        min_doc_set_size_for_filter: Some(0),
        ..SimilarityRequest::new("id:seed")
    }
}

fn keys(response: &SimilarityResponse) -> Vec<String> {
    response.response.docs.iter().map(|d| d.key.clone()).collect()
}

fn sorted_keys(response: &SimilarityResponse) -> Vec<String> {
    let mut keys = keys(response);
    keys.sort();
    keys
}

// ============================================================
// Reduction and ranking
// ============================================================

#[tokio::test]
async fn reduced_pool_keeps_only_heavy_term_documents() {
    let (handler, _temp) = reference_handler();
    let response = handler.similar(reduced_request().with_window(0, 2)).await.unwrap();

    assert_eq!(sorted_keys(&response), vec!["d1", "d2"]);
    assert!(!keys(&response).contains(&"seed".to_string()));
    assert_eq!(response.seed.unwrap().key, "seed");

    let stats = handler.statistics();
    assert_eq!(stats.total_subset, 2);
    assert_eq!(stats.total_filtered, 2);
    assert_eq!(stats.total_terms_used, 1);
    assert_eq!(stats.total_terms_considered, 2);
}

#[tokio::test]
async fn small_pool_is_used_unreduced() {
    let (handler, _temp) = reference_handler();
    let mut request = reduced_request();
    request.min_doc_set_size_for_filter = Some(100);
    request.debug = DebugOptions {
        query: true,
        results: false,
    };

    let response = handler.similar(request).await.unwrap();
    let debug = response.debug.as_ref().unwrap();
    assert_eq!(debug.candidate_count, 4);
    assert_eq!(debug.terms_used, 0);
    assert!(debug.explain.is_none());

    // d4 shares no term with the seed, so the similarity query cannot rank it
    assert_eq!(sorted_keys(&response), vec!["d1", "d2", "d3"]);
}

#[tokio::test]
async fn filters_restrict_the_pool() {
    let (handler, _temp) = reference_handler();
    let request = reduced_request().with_filter("category:a");
    let response = handler.similar(request).await.unwrap();
    assert_eq!(keys(&response), vec!["d1"]);
}

#[tokio::test]
async fn knowledge_base_expansion_reaches_related_documents() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, r#"{{"wiki": {{"alpha": [["delta", 1.0]]}}}}"#).unwrap();
    let knowledge_bases = KnowledgeBases::from_json_file(file.path()).unwrap();
    let (handler, _temp) = create_handler(REFERENCE_DOCS, knowledge_bases);

    let literal = handler.similar(reduced_request()).await.unwrap();
    assert!(!keys(&literal).contains(&"d4".to_string()));

    let mut request = reduced_request();
    request.knowledge_base = Some("wiki".into());
    let expanded = handler.similar(request).await.unwrap();
    assert_eq!(sorted_keys(&expanded), vec!["d1", "d2", "d4"]);
}

#[tokio::test]
async fn zero_sense_weight_ignores_the_knowledge_base_when_ranking() {
    let knowledge_bases = KnowledgeBases::new().with(KnowledgeBase::new("wiki").relate("alpha", "delta", 1.0));
    let (handler, _temp) = create_handler(REFERENCE_DOCS, knowledge_bases);

    let mut request = reduced_request();
    request.knowledge_base = Some("wiki".into());
    request.weight = Some(0.0);
    let response = handler.similar(request).await.unwrap();

    // d4 is a candidate through the expansion but has no literal term to match
    assert_eq!(sorted_keys(&response), vec!["d1", "d2"]);
}

#[tokio::test]
async fn seed_without_terms_gives_empty_response() {
    let mut docs = REFERENCE_DOCS.to_vec();
    docs.push(("blank", "", "a"));
    let (handler, _temp) = create_handler(&docs, KnowledgeBases::new());

    let mut request = SimilarityRequest::new("id:blank");
    request.facets = Some(FacetParams {
        fields: vec!["category".into()],
        ..FacetParams::default()
    });
    let response = handler.similar(request).await.unwrap();

    assert!(response.response.docs.is_empty());
    assert_eq!(response.response.num_found, 0);
    assert_eq!(response.facet_counts, Facets::Absent);

    let json = serde_json::to_value(&response).unwrap();
    assert!(json["facet_counts"].is_null());
    assert_eq!(json["match"]["key"], "blank");

    let stats = handler.statistics();
    assert_eq!(stats.empty, 1);
    assert_eq!(stats.total_filtered, 0);
    assert_eq!(stats.total_subset, 0);
}

// ============================================================
// Pagination and caching
// ============================================================

#[tokio::test]
async fn identical_requests_hit_the_cache() {
    let (handler, _temp) = reference_handler();
    let first = handler.similar(reduced_request()).await.unwrap();
    let second = handler.similar(reduced_request()).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(handler.statistics().cache_hits, 1);
}

#[tokio::test]
async fn pagination_does_not_change_the_fingerprint() {
    let (handler, _temp) = reference_handler();
    let full = handler.similar(reduced_request()).await.unwrap();
    let second_page = handler.similar(reduced_request().with_window(1, 1)).await.unwrap();

    assert_eq!(handler.statistics().cache_hits, 1);
    assert_eq!(second_page.response.docs.len(), 1);
    assert_eq!(second_page.response.docs[0].key, full.response.docs[1].key);
    assert_eq!(second_page.response.start, 1);
}

#[tokio::test]
async fn deep_windows_always_recompute() {
    let (handler, _temp) = reference_handler();
    for _ in 0..2 {
        let response = handler.similar(reduced_request().with_window(995, 10)).await.unwrap();
        assert!(response.response.docs.is_empty());
        assert_eq!(response.response.num_found, 2);
    }
    assert_eq!(handler.statistics().cache_hits, 0);

    // The recomputed list was stored, so shallow windows are served from it
    handler.similar(reduced_request()).await.unwrap();
    assert_eq!(handler.statistics().cache_hits, 1);
}

#[tokio::test]
async fn window_past_the_end_is_empty() {
    let (handler, _temp) = reference_handler();
    let response = handler.similar(reduced_request().with_window(50, 10)).await.unwrap();
    assert!(response.response.docs.is_empty());
    assert_eq!(response.response.num_found, 2);
    assert_eq!(response.response.start, 50);
}

#[tokio::test]
async fn commits_scope_cached_results() {
    let (handler, _temp) = reference_handler();
    handler.similar(reduced_request()).await.unwrap();

    handler
        .indexer()
        .add_document(&CorpusDocument::new("d5").with("content", "alpha alpha").with("category", "a"))
        .unwrap();
    handler.indexer().commit().unwrap();

    let response = handler.similar(reduced_request()).await.unwrap();
    assert!(keys(&response).contains(&"d5".to_string()));
    assert_eq!(handler.statistics().cache_hits, 0);

    handler.reload().unwrap();
    handler.similar(reduced_request()).await.unwrap();
    assert_eq!(handler.statistics().cache_hits, 0);
}

#[tokio::test]
async fn disabled_cache_still_serves_requests() {
    let temp_dir = TempDir::new().unwrap();
    let indexer = Indexer::new(temp_dir.path(), corpus()).unwrap();
    for (key, content, category) in REFERENCE_DOCS {
        indexer
            .add_document(&CorpusDocument::new(*key).with("content", *content).with("category", *category))
            .unwrap();
    }
    indexer.commit().unwrap();
    let config = HandlerConfig {
        enable_cache: false,
        ..HandlerConfig::default()
    };
    let handler = SenseLikeThis::new(Arc::new(indexer), config, KnowledgeBases::new());
    assert!(handler.is_cache_degraded());

    let first = handler.similar(reduced_request()).await.unwrap();
    let second = handler.similar(reduced_request()).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(handler.statistics().cache_hits, 0);
}

// ============================================================
// Facets, debug and presentation
// ============================================================

#[tokio::test]
async fn facets_count_the_matched_set() {
    let (handler, _temp) = reference_handler();
    let mut request = reduced_request();
    request.min_doc_set_size_for_filter = Some(100);
    request.facets = Some(FacetParams {
        fields: vec!["category".into()],
        ..FacetParams::default()
    });

    let response = handler.similar(request).await.unwrap();
    let Facets::Counts(facets) = response.facet_counts else {
        panic!("expected facet counts");
    };
    assert_eq!(
        facets[0].counts,
        vec![
            FacetCount { value: "a".into(), count: 2 },
            FacetCount { value: "b".into(), count: 1 },
        ]
    );
}

#[tokio::test]
async fn facets_are_omitted_unless_requested() {
    let (handler, _temp) = reference_handler();
    let response = handler.similar(reduced_request()).await.unwrap();
    assert_eq!(response.facet_counts, Facets::NotRequested);

    let json = serde_json::to_value(&response).unwrap();
    assert!(json.get("facet_counts").is_none());
    assert!(json.get("debug").is_none());
}

#[tokio::test]
async fn include_match_can_be_disabled() {
    let (handler, _temp) = reference_handler();
    let mut request = reduced_request();
    request.include_match = false;
    let response = handler.similar(request).await.unwrap();
    assert!(response.seed.is_none());
    assert!(serde_json::to_value(&response).unwrap().get("match").is_none());
}

#[tokio::test]
async fn debug_explains_each_returned_document() {
    let (handler, _temp) = reference_handler();
    let mut request = reduced_request().with_filter("category:a").with_filter("  ");
    request.debug = DebugOptions::all();

    let response = handler.similar(request).await.unwrap();
    let debug = response.debug.unwrap();
    assert_eq!(debug.filter_queries, vec!["category:a"]);
    assert_eq!(debug.parsed_filter_queries.len(), 1);

    let explain = debug.explain.unwrap();
    assert_eq!(explain.len(), 1);
    assert_eq!(explain[0].key, "d1");
    assert!(!explain[0].explanation.is_empty());
}

// ============================================================
// Errors
// ============================================================

#[tokio::test]
async fn request_errors_carry_their_kind() {
    let (handler, _temp) = reference_handler();

    let cases = vec![
        (SimilarityRequest::default(), ErrorKind::BadRequest),
        (SimilarityRequest::new("   "), ErrorKind::BadRequest),
        (SimilarityRequest::new("content:(alpha"), ErrorKind::BadRequest),
        (SimilarityRequest::new("id:missing"), ErrorKind::SeedNotFound),
        (reduced_request().with_filter("nosuchfield:x"), ErrorKind::BadRequest),
        (
            SimilarityRequest {
                knowledge_base: Some("unknown".into()),
                ..reduced_request()
            },
            ErrorKind::BadRequest,
        ),
        (
            SimilarityRequest {
                field: Some("category".into()),
                ..reduced_request()
            },
            ErrorKind::BadRequest,
        ),
        (
            SimilarityRequest {
                match_offset: 1,
                ..reduced_request()
            },
            ErrorKind::SeedNotFound,
        ),
        (
            SimilarityRequest {
                match_offset: usize::MAX / 64,
                ..SimilarityRequest::new("content:alpha")
            },
            ErrorKind::SeedNotFound,
        ),
    ];

    let total = cases.len() as u64;
    for (request, expected) in cases {
        let err = handler.similar(request.clone()).await.unwrap_err();
        assert_eq!(err.kind(), expected, "request {:?} failed with {}", request, err);
    }

    let stats = handler.statistics();
    assert_eq!(stats.requests, total);
    assert_eq!(stats.errors, total);
}

#[tokio::test]
async fn error_response_serializes_kind() {
    let (handler, _temp) = reference_handler();
    let err = handler.similar(SimilarityRequest::new("id:missing")).await.unwrap_err();
    let json = serde_json::to_value(err.to_response()).unwrap();
    assert_eq!(json["kind"], "seed_not_found");
}

// ============================================================
// Concurrency
// ============================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_agree() {
    let (handler, _temp) = reference_handler();
    let requests = (0..16).map(|_| handler.similar(reduced_request()));
    let responses = futures::future::join_all(requests).await;

    let first = responses[0].as_ref().unwrap();
    for response in &responses {
        assert_eq!(response.as_ref().unwrap(), first);
    }
    assert_eq!(handler.statistics().requests, 16);
}

#[test]
fn async_api_works_without_a_runtime() {
    let (handler, _temp) = reference_handler();
    let response = futures::executor::block_on(handler.similar(reduced_request())).unwrap();
    assert_eq!(sorted_keys(&response), vec!["d1", "d2"]);
}
