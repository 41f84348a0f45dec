//! Command-line front end for SenseLike.
//!
//! Optionally loads a JSON Lines corpus into an on-disk index, then runs one
//! similarity request against it and prints the response as JSON.
//!
//! Usage:
//!     senselike --index ./idx --corpus docs.jsonl --text-field content --q 'id:42'
//!
//! Each corpus line is a flat JSON object; string or string-array values are
//! indexed under the field of the same name.

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde_json::Value;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use senselike::interface::{DebugOptions, FacetParams};
use senselike::{
    CorpusDocument, CorpusSchema, HandlerConfig, Indexer, KnowledgeBases, SenseLikeThis, SimilarityRequest,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Index directory (created if missing)
    #[arg(short, long)]
    index: PathBuf,

    /// JSON Lines corpus to load before querying
    #[arg(long)]
    corpus: Option<PathBuf>,

    /// Handler configuration JSON
    #[arg(long)]
    config: Option<PathBuf>,

    /// Knowledge-base definitions JSON
    #[arg(long)]
    knowledge_bases: Option<PathBuf>,

    /// Unique key field
    #[arg(long, default_value = "id")]
    key_field: String,

    /// Tokenized text field (repeatable)
    #[arg(long = "text-field", default_value = "content")]
    text_fields: Vec<String>,

    /// Keyword field for filters and facets (repeatable)
    #[arg(long = "keyword-field")]
    keyword_fields: Vec<String>,

    /// Base query selecting the seed document
    #[arg(short, long)]
    q: Option<String>,

    /// Filter query (repeatable)
    #[arg(long)]
    fq: Vec<String>,

    /// Text field to compare on
    #[arg(long)]
    field: Option<String>,

    /// Knowledge-base id ("none" for literal overlap)
    #[arg(long)]
    kb: Option<String>,

    /// Weight of knowledge-base expansions
    #[arg(long)]
    weight: Option<f32>,

    /// Which hit of the base query becomes the seed
    #[arg(long, default_value_t = 0)]
    match_offset: usize,

    /// Seed terms taking part in candidate reduction
    #[arg(long)]
    num_terms: Option<usize>,

    /// Minimum accumulated score for a candidate
    #[arg(long)]
    threshold: Option<f32>,

    /// Candidate set cap
    #[arg(long)]
    max_candidates: Option<usize>,

    /// Pools smaller than this are used unreduced
    #[arg(long)]
    min_doc_set_size: Option<usize>,

    #[arg(long, default_value_t = 0)]
    start: usize,

    #[arg(long)]
    rows: Option<usize>,

    /// Keyword field to facet on (repeatable)
    #[arg(long = "facet-field")]
    facet_fields: Vec<String>,

    /// Include scores in the output
    #[arg(long)]
    score: bool,

    /// Leave the seed document out of the output
    #[arg(long)]
    no_match: bool,

    /// Include the whole debug block (query and per-result explanations)
    #[arg(long)]
    debug: bool,

    /// Include the query part of the debug block
    #[arg(long)]
    debug_query: bool,

    /// Include per-result score explanations in the debug block
    #[arg(long)]
    debug_results: bool,

    /// Print handler statistics after the request
    #[arg(long)]
    stats: bool,
}

fn load_corpus(indexer: &Indexer, path: &Path, key_field: &str) -> Result<usize> {
    let reader = BufReader::new(File::open(path).with_context(|| format!("opening {}", path.display()))?);
    let mut loaded = 0;
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let Value::Object(object) = serde_json::from_str::<Value>(&line)
            .with_context(|| format!("line {}: invalid JSON", line_no + 1))?
        else {
            bail!("line {}: expected a JSON object", line_no + 1);
        };

        let key = match object.get(key_field) {
            Some(Value::String(key)) => key.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => bail!("line {}: missing key field '{}'", line_no + 1, key_field),
        };
        let mut doc = CorpusDocument::new(key);
        for (name, value) in object {
            if name == key_field {
                continue;
            }
            match value {
                Value::String(text) => doc = doc.with(name, text),
                Value::Array(values) => {
                    for text in values.into_iter().filter_map(|v| v.as_str().map(str::to_string)) {
                        doc = doc.with(name.clone(), text);
                    }
                }
                _ => {}
            }
        }
        indexer.add_document(&doc)?;
        loaded += 1;
    }
    indexer.commit()?;
    Ok(loaded)
}

/// Builds the similarity request the flags describe, if a base query was given.
fn request_from_args(args: &Args) -> Option<SimilarityRequest> {
    let q = args.q.clone()?;
    Some(SimilarityRequest {
        filters: args.fq.clone(),
        field: args.field.clone(),
        knowledge_base: args.kb.clone(),
        weight: args.weight,
        num_terms_to_use: args.num_terms,
        threshold: args.threshold,
        max_candidate_set_size: args.max_candidates,
        min_doc_set_size_for_filter: args.min_doc_set_size,
        match_offset: args.match_offset,
        start: args.start,
        rows: args.rows,
        include_match: !args.no_match,
        include_score: args.score,
        facets: (!args.facet_fields.is_empty()).then(|| FacetParams {
            fields: args.facet_fields.clone(),
            ..FacetParams::default()
        }),
        debug: DebugOptions {
            query: args.debug || args.debug_query,
            results: args.debug || args.debug_results,
        },
        ..SimilarityRequest::new(q)
    })
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let corpus = CorpusSchema {
        key_field: args.key_field.clone(),
        text_fields: args.text_fields.clone(),
        keyword_fields: args.keyword_fields.clone(),
    };
    let indexer = Indexer::new(&args.index, corpus).context("opening index")?;

    if let Some(path) = &args.corpus {
        let loaded = load_corpus(&indexer, path, &args.key_field)?;
        info!(loaded, "corpus loaded");
    }

    let config = match &args.config {
        Some(path) => HandlerConfig::from_json_file(path)?,
        None => HandlerConfig::default(),
    };
    let knowledge_bases = match &args.knowledge_bases {
        Some(path) => KnowledgeBases::from_json_file(path)?,
        None => KnowledgeBases::new(),
    };
    let handler = SenseLikeThis::new(Arc::new(indexer), config, knowledge_bases);

    if let Some(request) = request_from_args(&args) {
        match handler.handle(&request) {
            Ok(response) => println!("{}", serde_json::to_string_pretty(&response)?),
            Err(e) => {
                println!("{}", serde_json::to_string_pretty(&e.to_response())?);
                std::process::exit(1);
            }
        }
    }

    if args.stats {
        println!("{}", serde_json::to_string_pretty(&handler.stats().snapshot())?);
    }
    Ok(())
}
