//! Tantivy corpus index for SenseLike
//!
//! One unique key field, any number of tokenized text fields (stored, with
//! frequencies and positions) and keyword fields used for filtering and faceting.
//! The reader is reloaded manually; every reload bumps a generation counter that
//! is read together with the searcher so cached results can be scoped to it.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use tantivy::collector::TopDocs;
use tantivy::columnar::StrColumn;
use tantivy::directory::MmapDirectory;
use tantivy::query::TermQuery;
use tantivy::schema::{
    Field, FieldType, IndexRecordOption, Schema, TextFieldIndexing, TextOptions, Value, FAST, STORED,
    STRING,
};
use tantivy::{DocAddress, Index, IndexReader, IndexWriter, ReloadPolicy, Searcher, TantivyDocument, Term};
use thiserror::Error;

/// Error type for indexer operations
#[derive(Error, Debug)]
pub enum IndexerError {
    #[error("Tantivy error: {0}")]
    Tantivy(#[from] tantivy::TantivyError),
    #[error("Directory error: {0}")]
    Directory(#[from] tantivy::directory::error::OpenDirectoryError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Schema error: {0}")]
    Schema(String),
}

pub type IndexerResult<T> = Result<T, IndexerError>;

/// Declares the fields of a corpus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorpusSchema {
    pub key_field: String,
    pub text_fields: Vec<String>,
    pub keyword_fields: Vec<String>,
}

impl Default for CorpusSchema {
    fn default() -> Self {
        Self {
            key_field: "id".to_string(),
            text_fields: vec!["content".to_string()],
            keyword_fields: Vec::new(),
        }
    }
}

impl CorpusSchema {
    pub fn new(key_field: impl Into<String>) -> Self {
        Self {
            key_field: key_field.into(),
            text_fields: Vec::new(),
            keyword_fields: Vec::new(),
        }
    }

    pub fn with_text_field(mut self, name: impl Into<String>) -> Self {
        self.text_fields.push(name.into());
        self
    }

    pub fn with_keyword_field(mut self, name: impl Into<String>) -> Self {
        self.keyword_fields.push(name.into());
        self
    }

    fn build(&self) -> IndexerResult<Schema> {
        let mut seen = std::collections::HashSet::new();
        let all_names = std::iter::once(&self.key_field)
            .chain(&self.text_fields)
            .chain(&self.keyword_fields);
        for name in all_names {
            if !seen.insert(name.as_str()) {
                return Err(IndexerError::Schema(format!("field '{}' declared twice", name)));
            }
        }

        let mut builder = Schema::builder();
        // Fast so candidate keys are read from a column instead of the doc store
        builder.add_text_field(&self.key_field, STRING | STORED | FAST);

        // Stored so term vectors can be rebuilt from the field's own analyzer
        let text_field_indexing = TextFieldIndexing::default()
            .set_tokenizer("default")
            .set_index_option(IndexRecordOption::WithFreqsAndPositions);
        let text_options = TextOptions::default()
            .set_indexing_options(text_field_indexing)
            .set_stored();
        for name in &self.text_fields {
            builder.add_text_field(name, text_options.clone());
        }

        for name in &self.keyword_fields {
            builder.add_text_field(name, STRING | STORED);
        }
        Ok(builder.build())
    }
}

/// A document to index: its unique key plus field values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CorpusDocument {
    pub key: String,
    pub fields: BTreeMap<String, Vec<String>>,
}

impl CorpusDocument {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.entry(field.into()).or_default().push(value.into());
        self
    }
}

/// Point-in-time view of the index.
#[derive(Clone)]
pub struct IndexSnapshot {
    pub searcher: Searcher,
    pub generation: u64,
}

/// Tantivy-based corpus index
pub struct Indexer {
    index: Index,
    writer: RwLock<IndexWriter>,
    reader: RwLock<IndexReader>,
    generation: AtomicU64,
    schema: Schema,
    corpus: CorpusSchema,
    key_field: Field,
}

impl Indexer {
    /// Open or create an index at the given path
    pub fn new(path: &Path, corpus: CorpusSchema) -> IndexerResult<Self> {
        std::fs::create_dir_all(path)?;
        let dir = MmapDirectory::open(path)?;
        let schema = corpus.build()?;
        let index = Index::open_or_create(dir, schema.clone())?;

        let writer = index.writer(50_000_000)?;
        let reader = index.reader_builder().reload_policy(ReloadPolicy::Manual).try_into()?;

        Self::from_parts(index, writer, reader, schema, corpus)
    }

    /// Create an in-memory index (tests, benches, throwaway corpora)
    pub fn new_in_memory(corpus: CorpusSchema) -> IndexerResult<Self> {
        let schema = corpus.build()?;
        let index = Index::create_in_ram(schema.clone());

        let writer = index.writer(15_000_000)?;
        let reader = index.reader_builder().reload_policy(ReloadPolicy::Manual).try_into()?;

        Self::from_parts(index, writer, reader, schema, corpus)
    }

    fn from_parts(
        index: Index,
        writer: IndexWriter,
        reader: IndexReader,
        schema: Schema,
        corpus: CorpusSchema,
    ) -> IndexerResult<Self> {
        let key_field = schema
            .get_field(&corpus.key_field)
            .map_err(|e| IndexerError::Schema(e.to_string()))?;
        Ok(Self {
            key_field,
            schema,
            corpus,
            index,
            writer: RwLock::new(writer),
            reader: RwLock::new(reader),
            generation: AtomicU64::new(0),
        })
    }

    /// Add or replace a document (upsert on the unique key)
    pub fn add_document(&self, document: &CorpusDocument) -> IndexerResult<()> {
        let writer = self.writer.read();
        writer.delete_term(Term::from_field_text(self.key_field, &document.key));

        let mut doc = TantivyDocument::default();
        doc.add_text(self.key_field, &document.key);
        for (name, values) in &document.fields {
            if *name == self.corpus.key_field {
                continue;
            }
            let field = self
                .schema
                .get_field(name)
                .map_err(|_| IndexerError::Schema(format!("unknown field '{}'", name)))?;
            for value in values {
                doc.add_text(field, value);
            }
        }

        writer.add_document(doc)?;
        Ok(())
    }

    pub fn delete_document(&self, key: &str) -> IndexerResult<()> {
        let writer = self.writer.read();
        writer.delete_term(Term::from_field_text(self.key_field, key));
        Ok(())
    }

    /// Commit pending writes and make them visible to new snapshots.
    pub fn commit(&self) -> IndexerResult<()> {
        self.writer.write().commit()?;
        self.reload()
    }

    /// Reload the reader and start a new generation.
    pub fn reload(&self) -> IndexerResult<()> {
        let reader = self.reader.write();
        reader.reload()?;
        self.generation.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    pub fn snapshot(&self) -> IndexSnapshot {
        let reader = self.reader.read();
        IndexSnapshot {
            searcher: reader.searcher(),
            generation: self.generation.load(Ordering::SeqCst),
        }
    }

    pub fn num_docs(&self) -> u64 {
        self.reader.read().searcher().num_docs()
    }

    pub fn index(&self) -> &Index {
        &self.index
    }

    pub fn corpus(&self) -> &CorpusSchema {
        &self.corpus
    }

    pub fn key_field(&self) -> Field {
        self.key_field
    }

    /// Look up a declared text field that is both indexed with frequencies and stored.
    pub fn text_field(&self, name: &str) -> Option<Field> {
        if !self.corpus.text_fields.iter().any(|f| f == name) {
            return None;
        }
        let field = self.schema.get_field(name).ok()?;
        match self.schema.get_field_entry(field).field_type() {
            FieldType::Str(options) if options.is_stored() && options.get_indexing_options().is_some() => {
                Some(field)
            }
            _ => None,
        }
    }

    pub fn keyword_field(&self, name: &str) -> Option<Field> {
        if !self.corpus.keyword_fields.iter().any(|f| f == name) {
            return None;
        }
        self.schema.get_field(name).ok()
    }

    /// Fields the query parser searches when a clause names no field.
    pub fn default_search_fields(&self) -> Vec<Field> {
        self.corpus
            .text_fields
            .iter()
            .filter_map(|name| self.schema.get_field(name).ok())
            .collect()
    }

    /// Read the stored unique key of a document.
    pub fn stored_key(&self, searcher: &Searcher, address: DocAddress) -> IndexerResult<Option<String>> {
        let doc: TantivyDocument = searcher.doc(address)?;
        Ok(doc
            .get_first(self.key_field)
            .and_then(|v| v.as_str())
            .map(str::to_string))
    }

    /// Read the unique keys of `addresses` from the key column, in order.
    pub fn fast_keys(&self, searcher: &Searcher, addresses: &[DocAddress]) -> IndexerResult<Vec<Option<String>>> {
        let mut columns: HashMap<u32, Option<StrColumn>> = HashMap::new();
        let mut keys = Vec::with_capacity(addresses.len());
        for address in addresses {
            let column = match columns.entry(address.segment_ord) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => entry.insert(
                    searcher
                        .segment_reader(address.segment_ord)
                        .fast_fields()
                        .str(&self.corpus.key_field)?,
                ),
            };
            let mut key = None;
            if let Some(column) = column {
                if let Some(ord) = column.term_ords(address.doc_id).next() {
                    let mut text = String::new();
                    if column.ord_to_str(ord, &mut text)? {
                        key = Some(text);
                    }
                }
            }
            keys.push(key);
        }
        Ok(keys)
    }

    /// Resolve a unique key to its document address in the given snapshot.
    pub fn find_by_key(&self, searcher: &Searcher, key: &str) -> IndexerResult<Option<DocAddress>> {
        let query = TermQuery::new(
            Term::from_field_text(self.key_field, key),
            IndexRecordOption::Basic,
        );
        let hits = searcher.search(&query, &TopDocs::with_limit(1))?;
        Ok(hits.into_iter().next().map(|(_, address)| address))
    }
}
