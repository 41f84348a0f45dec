//! The retrieval orchestrator.
//!
//! `SenseLikeThis` resolves a seed document from the base query, narrows the
//! corpus to a candidate set, ranks the candidates with a similarity query and
//! serves a window of the ranked list, caching ranked lists per request
//! fingerprint.
//!
//! Concurrency Model:
//! - Each request works against one point-in-time searcher snapshot
//! - The similarity cache and the stats counters are the only shared mutable state
//! - Blocking work runs on tokio::spawn_blocking threads
//! - Uses global FALLBACK_RUNTIME when called outside any runtime

use once_cell::sync::Lazy;
use std::sync::{Arc, Once};
use std::time::Instant;
use tantivy::collector::{DocSetCollector, TopDocs};
use tantivy::query::{Query, QueryParser};
use tantivy::schema::Field;
use tantivy::{DocAddress, Score, Searcher, Term};
use tracing::{debug, error, info, warn};

use crate::cache::{CacheKey, CacheRegistry, Fingerprint, FingerprintParams, MatchedResult, RankedDoc, ResultCache};
use crate::config::HandlerConfig;
use crate::facets::facet_counts;
use crate::indexer::Indexer;
use crate::interface::{
    DebugInfo, DocExplanation, Facets, ResultWindow, SeedMatch, SenseError, SenseLikeThisApi, SimilarDoc,
    SimilarityRequest, SimilarityResponse,
};
use crate::reduction::{pool_query, CandidateReducer, ReductionConfig};
use crate::sense::{KnowledgeBases, SenseStrategy};
use crate::similarity::SimilarityQueryBuilder;
use crate::stats::{HandlerStats, StatsSnapshot};
use crate::term_vector;

/// Maximum number of ranked documents kept per computation.
pub const RANKED_RESULT_CAP: usize = 1000;

/// Global fallback Tokio runtime for when async functions are called outside any runtime context.
/// Shared across all handlers and never dropped.
static FALLBACK_RUNTIME: Lazy<tokio::runtime::Runtime> = Lazy::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to create fallback tokio runtime")
});

static RAYON_INIT: Once = Once::new();

/// Initialize the global Rayon pool used for facet counting, leaving two cores to Tokio.
fn init_rayon() {
    RAYON_INIT.call_once(|| {
        let num_threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        let rayon_threads = num_threads.saturating_sub(2).max(1);

        let _ = rayon::ThreadPoolBuilder::new()
            .num_threads(rayon_threads)
            .thread_name(|i| format!("senselike-rayon-{}", i))
            .build_global();
    });
}

/// Request options after falling back to handler defaults.
struct ResolvedParams<'a> {
    q: &'a str,
    filters: Vec<&'a str>,
    field: &'a str,
    knowledge_base: &'a str,
    weight: f32,
    reduction: ReductionConfig,
    rows: usize,
}

impl ResolvedParams<'_> {
    fn fingerprint_params(&self, match_offset: usize) -> FingerprintParams<'_> {
        FingerprintParams {
            q: self.q,
            match_offset,
            filters: self.filters.clone(),
            field: self.field,
            knowledge_base: self.knowledge_base,
            weight: self.weight,
            num_terms_to_use: self.reduction.num_terms_to_use,
            threshold: self.reduction.threshold,
            max_candidate_set_size: self.reduction.max_candidate_set_size,
            min_doc_set_size_for_filter: self.reduction.min_doc_set_size_for_filter,
        }
    }
}

/// Counters of one computation, reported in the debug block.
#[derive(Debug, Default)]
struct ComputeTrace {
    terms_considered: usize,
    terms_used: usize,
    pool_size: u64,
    filtered_out: u64,
    candidate_count: usize,
}

/// The resolved seed document.
struct Seed {
    address: DocAddress,
    key: String,
    score: Score,
}

/// "Find documents similar to this one" handler.
#[derive(Clone)]
pub struct SenseLikeThis {
    indexer: Arc<Indexer>,
    config: Arc<HandlerConfig>,
    knowledge_bases: Arc<KnowledgeBases>,
    registry: Arc<CacheRegistry>,
    cache: ResultCache,
    stats: Arc<HandlerStats>,
}

impl SenseLikeThis {
    /// Create a handler with its own cache registry, holding the similarity
    /// cache unless caching is disabled in `config`.
    pub fn new(indexer: Arc<Indexer>, config: HandlerConfig, knowledge_bases: KnowledgeBases) -> Self {
        let registry = if config.enable_cache {
            CacheRegistry::with_similarity_cache(config.cache_capacity)
        } else {
            CacheRegistry::new()
        };
        Self::with_registry(indexer, config, knowledge_bases, Arc::new(registry))
    }

    /// Create a handler over a shared cache registry.
    pub fn with_registry(
        indexer: Arc<Indexer>,
        config: HandlerConfig,
        knowledge_bases: KnowledgeBases,
        registry: Arc<CacheRegistry>,
    ) -> Self {
        init_rayon();
        let cache = ResultCache::from_registry(&registry);
        Self {
            indexer,
            config: Arc::new(config),
            knowledge_bases: Arc::new(knowledge_bases),
            registry,
            cache,
            stats: Arc::new(HandlerStats::new()),
        }
    }

    pub fn indexer(&self) -> &Arc<Indexer> {
        &self.indexer
    }

    pub fn config(&self) -> &HandlerConfig {
        &self.config
    }

    pub fn stats(&self) -> &HandlerStats {
        &self.stats
    }

    /// True when no similarity cache is available.
    pub fn is_cache_degraded(&self) -> bool {
        self.cache.is_degraded()
    }

    /// Reload the index reader and drop every cached result.
    pub fn reload(&self) -> Result<(), SenseError> {
        self.indexer.reload()?;
        self.registry.invalidate_all();
        info!(generation = self.indexer.snapshot().generation, "index reloaded, caches invalidated");
        Ok(())
    }

    /// Get a tokio runtime handle - uses current runtime if available, otherwise global fallback
    fn runtime_handle(&self) -> tokio::runtime::Handle {
        tokio::runtime::Handle::try_current()
            .unwrap_or_else(|_| FALLBACK_RUNTIME.handle().clone())
    }

    /// Serve one request synchronously, recording it in the handler stats.
    pub fn handle(&self, request: &SimilarityRequest) -> Result<SimilarityResponse, SenseError> {
        let started = Instant::now();
        self.stats.record_request();

        let result = self.run(request);

        self.stats.record_elapsed(started.elapsed());
        if let Err(e) = &result {
            self.stats.record_error();
            error!(kind = ?e.kind(), error = %e, "similarity request failed");
        }
        result
    }

    fn run(&self, request: &SimilarityRequest) -> Result<SimilarityResponse, SenseError> {
        let params = self.resolve(request)?;
        let snapshot = self.indexer.snapshot();
        let searcher = &snapshot.searcher;

        let parser = QueryParser::for_index(self.indexer.index(), self.indexer.default_search_fields());
        let base_query = parser.parse_query(params.q)?;
        let filter_queries = params
            .filters
            .iter()
            .map(|f| parser.parse_query(f))
            .collect::<Result<Vec<_>, _>>()?;

        let seed = self.resolve_seed(searcher, base_query.as_ref(), request.match_offset)?;

        let field = self
            .indexer
            .text_field(params.field)
            .ok_or_else(|| SenseError::FieldNotFound(params.field.to_string()))?;
        let strategy = self.knowledge_bases.strategy_for(params.knowledge_base)?;

        let fingerprint = Fingerprint::of(&params.fingerprint_params(request.match_offset))?;
        let key = CacheKey::new(fingerprint, snapshot.generation);

        let (matched, trace, cache_hit) = match self.cache.lookup(&key, request.start, params.rows) {
            Some(hit) => {
                self.stats.record_cache_hit();
                debug!(fingerprint = %fingerprint.to_hex(), "similarity cache hit");
                (hit, ComputeTrace::default(), true)
            }
            None => {
                let started = Instant::now();
                let (result, trace) =
                    self.compute(searcher, &seed, field, strategy.as_ref(), &params, &filter_queries)?;
                debug!(elapsed_ms = started.elapsed().as_millis() as u64, "similarity computed");
                let result = Arc::new(result);
                self.cache.put(key, Arc::clone(&result));
                (result, trace, false)
            }
        };

        if matched.is_empty() {
            self.stats.record_empty();
        }

        let docs = matched
            .window(request.start, params.rows)
            .iter()
            .map(|doc| SimilarDoc {
                key: doc.key.clone(),
                score: request.include_score.then_some(doc.score),
            })
            .collect();

        let facets = match &request.facets {
            None => Facets::NotRequested,
            Some(facet_params) => match matched.doc_set() {
                None => Facets::Absent,
                Some(doc_set) => Facets::Counts(facet_counts(&self.indexer, searcher, doc_set, facet_params)?),
            },
        };

        let debug = request.debug.enabled().then(|| {
            let mut info = DebugInfo {
                raw_query: params.q.to_string(),
                parsed_query: format!("{:?}", base_query),
                filter_queries: params.filters.iter().map(|f| f.to_string()).collect(),
                parsed_filter_queries: filter_queries.iter().map(|q| format!("{:?}", q)).collect(),
                fingerprint: fingerprint.to_hex(),
                cache_hit,
                terms_considered: trace.terms_considered,
                terms_used: trace.terms_used,
                pool_size: trace.pool_size,
                filtered_out: trace.filtered_out,
                candidate_count: trace.candidate_count,
                ..DebugInfo::default()
            };
            if request.debug.results {
                let window = matched.window(request.start, params.rows);
                match self.explain(searcher, &seed, field, strategy.as_ref(), &params, window) {
                    Ok(explanations) => info.explain = Some(explanations),
                    Err(e) => {
                        warn!(error = %e, "failed to build debug explanations");
                        info.exception_during_debug = Some(e.to_string());
                    }
                }
            }
            info
        });

        Ok(SimilarityResponse {
            seed: request.include_match.then(|| SeedMatch {
                key: seed.key.clone(),
                score: request.include_score.then_some(seed.score),
            }),
            response: ResultWindow {
                num_found: matched.num_found(),
                start: request.start,
                docs,
            },
            facet_counts: facets,
            debug,
        })
    }

    fn resolve<'a>(&'a self, request: &'a SimilarityRequest) -> Result<ResolvedParams<'a>, SenseError> {
        let q = request
            .q
            .as_deref()
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .ok_or_else(|| SenseError::InvalidInput("missing base query 'q'".into()))?;

        let weight = request.weight.unwrap_or(self.config.sense_weight);
        if !weight.is_finite() || weight < 0.0 {
            return Err(SenseError::InvalidInput(format!("weight must be a non-negative number, got {}", weight)));
        }

        let defaults = &self.config.reduction;
        let reduction = ReductionConfig {
            num_terms_to_use: request.num_terms_to_use.unwrap_or(defaults.num_terms_to_use),
            threshold: request.threshold.unwrap_or(defaults.threshold),
            max_candidate_set_size: request.max_candidate_set_size.unwrap_or(defaults.max_candidate_set_size),
            min_doc_set_size_for_filter: request
                .min_doc_set_size_for_filter
                .unwrap_or(defaults.min_doc_set_size_for_filter),
        };
        if !reduction.threshold.is_finite() {
            return Err(SenseError::InvalidInput(format!("threshold must be finite, got {}", reduction.threshold)));
        }

        Ok(ResolvedParams {
            q,
            filters: request
                .filters
                .iter()
                .map(|f| f.trim())
                .filter(|f| !f.is_empty())
                .collect(),
            field: request.field.as_deref().unwrap_or(self.config.sense_field.as_str()),
            knowledge_base: request.knowledge_base.as_deref().unwrap_or(self.config.knowledge_base.as_str()),
            weight,
            reduction,
            rows: request.rows.unwrap_or(self.config.rows),
        })
    }

    /// The `match_offset`-th hit of the base query.
    fn resolve_seed(&self, searcher: &Searcher, base_query: &dyn Query, match_offset: usize) -> Result<Seed, SenseError> {
        // The collector sizes its heap from the offset, so reject offsets no hit can reach.
        if match_offset as u64 >= searcher.num_docs() {
            return Err(SenseError::SeedNotFound);
        }
        let hits = searcher.search(base_query, &TopDocs::with_limit(1).and_offset(match_offset))?;
        let (score, address) = hits.into_iter().next().ok_or(SenseError::SeedNotFound)?;
        let key = self
            .indexer
            .stored_key(searcher, address)?
            .ok_or_else(|| SenseError::Index("seed document has no stored key".into()))?;
        Ok(Seed { address, key, score })
    }

    fn compute(
        &self,
        searcher: &Searcher,
        seed: &Seed,
        field: Field,
        strategy: &dyn SenseStrategy,
        params: &ResolvedParams<'_>,
        filters: &[Box<dyn Query>],
    ) -> Result<(MatchedResult, ComputeTrace), SenseError> {
        let vector = term_vector::extract(&self.indexer, searcher, seed.address, params.field)?;

        let pool = pool_query(filters, Some(Term::from_field_text(self.indexer.key_field(), &seed.key)));
        let candidates = CandidateReducer::new(&self.indexer, searcher, field, strategy, &params.reduction)
            .reduce(&vector, pool.as_ref())?;

        self.stats.record_reduction(
            candidates.filtered_out,
            candidates.len() as u64,
            vector.len() as u64,
            candidates.terms_used as u64,
        );
        info!(
            subset = candidates.len(),
            pool = candidates.pool_size,
            reduced = candidates.reduced,
            "candidate set selected"
        );

        let trace = ComputeTrace {
            terms_considered: vector.len(),
            terms_used: candidates.terms_used,
            pool_size: candidates.pool_size,
            filtered_out: candidates.filtered_out,
            candidate_count: candidates.len(),
        };
        if candidates.is_empty() {
            return Ok((MatchedResult::empty(), trace));
        }

        let query = SimilarityQueryBuilder::new(field, strategy, params.weight).build(&vector);
        let restricted = query.restricted_to(self.indexer.key_field(), candidates.keys());
        let (top_docs, doc_set) =
            searcher.search(restricted.as_ref(), &(TopDocs::with_limit(RANKED_RESULT_CAP), DocSetCollector))?;

        if doc_set.is_empty() {
            return Ok((MatchedResult::empty(), trace));
        }

        let addresses: Vec<DocAddress> = top_docs.iter().map(|(_, address)| *address).collect();
        let keys = self.indexer.fast_keys(searcher, &addresses)?;
        let docs = top_docs
            .into_iter()
            .zip(keys)
            .filter_map(|((score, address), key)| key.map(|key| RankedDoc { address, key, score }))
            .collect();
        Ok((MatchedResult::new(docs, doc_set), trace))
    }

    /// Explain the similarity score of each document in `window`.
    fn explain(
        &self,
        searcher: &Searcher,
        seed: &Seed,
        field: Field,
        strategy: &dyn SenseStrategy,
        params: &ResolvedParams<'_>,
        window: &[RankedDoc],
    ) -> Result<Vec<DocExplanation>, SenseError> {
        let vector = term_vector::extract(&self.indexer, searcher, seed.address, params.field)?;
        let query = SimilarityQueryBuilder::new(field, strategy, params.weight).build(&vector);
        window
            .iter()
            .map(|doc| -> Result<DocExplanation, SenseError> {
                let explanation = query.query().explain(searcher, doc.address)?;
                Ok(DocExplanation {
                    key: doc.key.clone(),
                    explanation: explanation.to_pretty_json(),
                })
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl SenseLikeThisApi for SenseLikeThis {
    async fn similar(&self, request: SimilarityRequest) -> Result<SimilarityResponse, SenseError> {
        let handler = self.clone();
        let handle = self
            .runtime_handle()
            .spawn_blocking(move || handler.handle(&request));
        handle
            .await
            .map_err(|e| SenseError::Runtime(e.to_string()))?
    }

    fn statistics(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}
