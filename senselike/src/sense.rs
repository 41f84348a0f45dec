//! Similarity dimensions ("senses").
//!
//! A `SenseStrategy` decides which index terms a seed term stands for. Literal
//! overlap only ever matches the term itself; a knowledge base adds conceptually
//! related terms that earn partial credit. The strategy is selected per request by
//! knowledge-base id.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::interface::SenseError;

/// Knowledge-base id selecting plain term overlap.
pub const LITERAL_KB_ID: &str = "none";

pub trait SenseStrategy: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Related terms for `term` with their partial-credit factor in `(0, 1]`.
    /// Never includes `term` itself.
    fn related_terms(&self, term: &str) -> Vec<(String, f32)>;

    /// The literal term with factor 1.0 followed by its related terms.
    fn expand(&self, term: &str) -> Vec<(String, f32)> {
        let mut expanded = vec![(term.to_string(), 1.0)];
        expanded.extend(self.related_terms(term));
        expanded
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LiteralOverlap;

impl SenseStrategy for LiteralOverlap {
    fn name(&self) -> &str {
        LITERAL_KB_ID
    }

    fn related_terms(&self, _term: &str) -> Vec<(String, f32)> {
        Vec::new()
    }
}

/// Term relations of one knowledge base.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KnowledgeBase {
    id: String,
    relations: HashMap<String, Vec<(String, f32)>>,
}

impl KnowledgeBase {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            relations: HashMap::new(),
        }
    }

    /// Relate `term` to `related`. Factors are clamped into `(0, 1]`; self-relations
    /// and non-positive factors are dropped, and a repeated pair keeps the larger factor.
    pub fn relate(mut self, term: impl Into<String>, related: impl Into<String>, factor: f32) -> Self {
        let (term, related) = (term.into(), related.into());
        if term == related || factor.is_nan() || factor <= 0.0 {
            return self;
        }
        let factor = factor.min(1.0);
        let entries = self.relations.entry(term).or_default();
        match entries.iter_mut().find(|(t, _)| *t == related) {
            Some(existing) => existing.1 = existing.1.max(factor),
            None => entries.push((related, factor)),
        }
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn related(&self, term: &str) -> &[(String, f32)] {
        self.relations.get(term).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Expansion through a knowledge base.
#[derive(Debug, Clone)]
pub struct KnowledgeBaseExpansion {
    kb: Arc<KnowledgeBase>,
}

impl KnowledgeBaseExpansion {
    pub fn new(kb: Arc<KnowledgeBase>) -> Self {
        Self { kb }
    }
}

impl SenseStrategy for KnowledgeBaseExpansion {
    fn name(&self) -> &str {
        self.kb.id()
    }

    fn related_terms(&self, term: &str) -> Vec<(String, f32)> {
        self.kb.related(term).to_vec()
    }
}

/// On-disk form: `{ kb_id: { term: [[related, factor], ...] } }`.
type KnowledgeBaseFile = HashMap<String, HashMap<String, Vec<(String, f32)>>>;

/// Registry of knowledge bases by id.
#[derive(Debug, Clone, Default)]
pub struct KnowledgeBases {
    bases: HashMap<String, Arc<KnowledgeBase>>,
}

impl KnowledgeBases {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, kb: KnowledgeBase) {
        self.bases.insert(kb.id().to_string(), Arc::new(kb));
    }

    pub fn with(mut self, kb: KnowledgeBase) -> Self {
        self.insert(kb);
        self
    }

    pub fn len(&self) -> usize {
        self.bases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bases.is_empty()
    }

    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        let file: KnowledgeBaseFile = serde_json::from_str(json)?;
        Ok(Self::from_file(file))
    }

    pub fn from_json_file(path: &Path) -> Result<Self, crate::config::ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Ok(Self::from_json_str(&json)?)
    }

    fn from_file(file: KnowledgeBaseFile) -> Self {
        let mut bases = Self::new();
        for (id, relations) in file {
            let mut kb = KnowledgeBase::new(id);
            for (term, related) in relations {
                for (other, factor) in related {
                    kb = kb.relate(term.clone(), other, factor);
                }
            }
            bases.insert(kb);
        }
        bases
    }

    /// Pick the strategy for a request's knowledge-base id.
    pub fn strategy_for(&self, id: &str) -> Result<Arc<dyn SenseStrategy>, SenseError> {
        let id = id.trim();
        if id.is_empty() || id == LITERAL_KB_ID {
            return Ok(Arc::new(LiteralOverlap));
        }
        self.bases
            .get(id)
            .map(|kb| Arc::new(KnowledgeBaseExpansion::new(Arc::clone(kb))) as Arc<dyn SenseStrategy>)
            .ok_or_else(|| SenseError::InvalidInput(format!("unknown knowledge base '{}'", id)))
    }
}
