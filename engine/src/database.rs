//! The "capability" spec.md §6 enumerates and §4.2's façade wraps: a
//! tantivy-backed implementation of one sub-index (a single endpoint).
//!
//! spec.md explicitly scopes the underlying engine's own document model,
//! term storage and query evaluation out of this system (§1); this module
//! is the one place that decision gets made concrete, by mapping the data
//! model of §3 onto a fixed tantivy schema. See DESIGN.md for the
//! reasoning and SPEC_FULL.md §3 for the field layout.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use tantivy::collector::TopDocs;
use tantivy::query::{BooleanQuery, FuzzyTermQuery, Occur, Query, QueryParser, TermQuery};
use tantivy::schema::{
    Field, IndexRecordOption, Schema, SchemaBuilder, BytesOptions, TextFieldIndexing, TextOptions,
    STORED, STRING, TEXT,
};
use tantivy::tokenizer::{Language, LowerCaser, RemoveLongFilter, SimpleTokenizer, Stemmer, TextAnalyzer};
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, Searcher, Term};

use crate::document::{FreeTerm, FreeText, StoredValue};
use crate::endpoint::Endpoint;
use crate::error::EngineError;
use crate::slot;

/// The document the writer hands to the façade, already resolved from an
/// `InputDocument` (spec §4.4 "Index operation semantics").
#[derive(Debug, Clone)]
pub struct EngineDocument {
    pub id: String,
    pub data: Vec<u8>,
    pub values: std::collections::BTreeMap<u32, StoredValue>,
    /// Exact (untokenized) boolean terms, plus the `X<slot>:` field
    /// markers that accompany prefixed free text.
    pub boolean_terms: Vec<String>,
    /// Free (weighted) postings from `terms[]` entries whose field name
    /// was all-lowercase (spec §4.4).
    pub free_terms: Vec<FreeTerm>,
    /// `texts[]` entries with their per-entry flags still attached, so
    /// `replace_document` can apply weight/prefix/language/spelling/
    /// positions per entry instead of dropping them.
    pub free_texts: Vec<FreeText>,
}

/// A document as retrieved from the index (spec §4.7 match row fields).
#[derive(Debug, Clone)]
pub struct RetrievedDocument {
    pub id: String,
    pub docid: u32,
    pub data: Vec<u8>,
    pub values: std::collections::BTreeMap<u32, StoredValue>,
    pub terms: Vec<String>,
}

/// The fixed schema fields backing every sub-index (SPEC_FULL.md §3).
#[derive(Clone)]
pub struct Fields {
    pub id: Field,
    pub boolean_terms: Field,
    /// Positional free text (`texts[].positions != false`).
    pub text: Field,
    /// Non-positional free text (`texts[].positions == false`): same
    /// tokenizer, no position lookup, so a phrase query can never match
    /// an entry that asked not to be indexed positionally.
    pub text_nopos: Field,
    pub data: Field,
    pub values: Field,
}

fn build_schema() -> (Schema, Fields) {
    let mut builder: SchemaBuilder = Schema::builder();
    let id = builder.add_text_field("id", STRING | STORED);
    let boolean_terms = builder.add_text_field("boolean_terms", STRING);
    let text = builder.add_text_field("text", TEXT);
    let text_nopos_indexing = TextFieldIndexing::default()
        .set_tokenizer("default")
        .set_index_option(IndexRecordOption::WithFreqs);
    let text_nopos = builder.add_text_field(
        "text_nopos",
        TextOptions::default().set_indexing_options(text_nopos_indexing),
    );
    let data = builder.add_bytes_field("data", BytesOptions::default().set_stored());
    let values = builder.add_bytes_field("values", BytesOptions::default().set_stored());
    let schema = builder.build();
    (schema, Fields { id, boolean_terms, text, text_nopos, data, values })
}

/// Lowercases and tokenizes `text` the same way the `text`/`text_nopos`
/// fields' own "default" tokenizer would, without a stemmer. Used both to
/// derive the exact boolean terms a `texts[].prefix` marker should carry,
/// and as the fallback when no `language` is recognized.
fn lower_tokens(text: &str) -> Vec<String> {
    let mut analyzer = TextAnalyzer::from(SimpleTokenizer)
        .filter(RemoveLongFilter::limit(40))
        .filter(LowerCaser);
    let mut tokens = Vec::new();
    let mut stream = analyzer.token_stream(text);
    stream.process(&mut |token| tokens.push(token.text.clone()));
    tokens
}

/// The caller-facing stand-in for Xapian's `TermGenerator` with a stemmer
/// attached (spec §3, §4.4): tokenize, lowercase, and stem, applied by us
/// before the text ever reaches tantivy's own analyzer, so a stemmer
/// choice can vary per `texts[]` entry within a single index even though
/// a tantivy field's tokenizer is fixed at schema-build time.
fn stem_tokens(text: &str, language: Language) -> Vec<String> {
    let mut analyzer = TextAnalyzer::from(SimpleTokenizer)
        .filter(RemoveLongFilter::limit(40))
        .filter(LowerCaser)
        .filter(Stemmer::new(language));
    let mut tokens = Vec::new();
    let mut stream = analyzer.token_stream(text);
    stream.process(&mut |token| tokens.push(token.text.clone()));
    tokens
}

/// Maps a `texts[].language` string onto one of tantivy's built-in
/// stemmers. Unrecognized/missing languages fall back to no stemming
/// rather than an error — `language` is advisory, not validated input.
fn stemmer_language(language: &str) -> Option<Language> {
    Some(match language.to_lowercase().as_str() {
        "ar" | "arabic" => Language::Arabic,
        "da" | "danish" => Language::Danish,
        "nl" | "dutch" => Language::Dutch,
        "en" | "english" => Language::English,
        "fi" | "finnish" => Language::Finnish,
        "fr" | "french" => Language::French,
        "de" | "german" => Language::German,
        "el" | "greek" => Language::Greek,
        "hu" | "hungarian" => Language::Hungarian,
        "it" | "italian" => Language::Italian,
        "no" | "norwegian" => Language::Norwegian,
        "pt" | "portuguese" => Language::Portuguese,
        "ro" | "romanian" => Language::Romanian,
        "ru" | "russian" => Language::Russian,
        "es" | "spanish" => Language::Spanish,
        "sv" | "swedish" => Language::Swedish,
        "ta" | "tamil" => Language::Tamil,
        "tr" | "turkish" => Language::Turkish,
        _ => return None,
    })
}

/// One open tantivy index, corresponding to exactly one endpoint.
///
/// This is the "capability" the façade in [`crate::facade`] wraps with the
/// bounded retry-and-reopen policy of spec §4.2. `reopen` rebuilds the
/// reader so that subsequent reads observe the latest commit, matching
/// Xapian's reopen-on-modified-view semantics.
pub struct SingleDatabase {
    endpoint: Endpoint,
    index: Index,
    fields: Fields,
    writer: parking_lot::Mutex<Option<IndexWriter>>,
    reader: ArcSwap<IndexReader>,
    closed: AtomicBool,
    uuid: String,
}

impl SingleDatabase {
    /// Opens (creating if necessary) the tantivy index for one endpoint.
    pub fn open(endpoint: Endpoint, data_dir: &PathBuf, writable: bool) -> anyhow::Result<Self> {
        let (schema, fields) = build_schema();

        let index = match endpoint.scheme {
            crate::endpoint::Scheme::File => {
                let dir = data_dir.join(sanitize(&endpoint.path));
                std::fs::create_dir_all(&dir)?;
                if Index::exists(tantivy::directory::MmapDirectory::open(&dir)?)? {
                    Index::open_in_dir(&dir)?
                } else {
                    Index::create_in_dir(&dir, schema)?
                }
            }
            crate::endpoint::Scheme::Remote => {
                // Remote sub-indexes are an external-broker concern (spec
                // §1 scopes the remote wire protocol out); we still need a
                // local, schema-compatible index to satisfy the façade's
                // contract, so fall back to an in-RAM index keyed by the
                // remote endpoint's canonical string. A real deployment
                // would dial out here instead.
                Index::create_in_ram(schema)
            }
        };

        let writer = if writable {
            Some(index.writer(50_000_000)?)
        } else {
            None
        };

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;

        Ok(Self {
            endpoint,
            index,
            fields,
            writer: parking_lot::Mutex::new(writer),
            reader: ArcSwap::from_pointee(reader),
            closed: AtomicBool::new(false),
            uuid: uuid::Uuid::new_v4().to_string(),
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    pub fn closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn searcher(&self) -> Searcher {
        self.reader.load().searcher()
    }

    pub fn reopen(&self) -> anyhow::Result<()> {
        let reader: IndexReader = self
            .index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;
        reader.reload()?;
        self.reader.store(Arc::new(reader));
        Ok(())
    }

    pub fn get_uuid(&self) -> &str {
        &self.uuid
    }

    pub fn get_doccount(&self) -> u64 {
        self.searcher().num_docs()
    }

    /// Builds the (document, docid) pair for a live `id`, or `None` if no
    /// such document exists — this is the `DocNotFoundError` case (spec
    /// §4.2, §7: reported as "no such document" rather than an error).
    pub fn find_by_id(&self, id: &str) -> anyhow::Result<Option<(tantivy::Document, u32)>> {
        let searcher = self.searcher();
        let term = Term::from_field_text(self.fields.id, id);
        let query = tantivy::query::TermQuery::new(term, tantivy::schema::IndexRecordOption::Basic);
        let top = searcher.search(&query, &TopDocs::with_limit(1))?;
        match top.into_iter().next() {
            None => Ok(None),
            Some((_score, addr)) => {
                let doc = searcher.doc(addr)?;
                Ok(Some((doc, addr.doc_id())))
            }
        }
    }

    pub fn get_document(&self, id: &str) -> anyhow::Result<Option<RetrievedDocument>> {
        match self.find_by_id(id)? {
            None => Ok(None),
            Some((doc, docid)) => Ok(Some(self.to_retrieved(&doc, docid))),
        }
    }

    pub fn to_retrieved(&self, doc: &tantivy::Document, docid: u32) -> RetrievedDocument {
        let id = doc
            .get_first(self.fields.id)
            .and_then(|v| v.as_text())
            .unwrap_or_default()
            .to_string();
        let data = doc
            .get_first(self.fields.data)
            .and_then(|v| v.as_bytes())
            .map(|b| b.to_vec())
            .unwrap_or_default();
        let values = doc
            .get_first(self.fields.values)
            .and_then(|v| v.as_bytes())
            .and_then(|b| bincode::deserialize(b).ok())
            .unwrap_or_default();
        let terms = doc
            .get_all(self.fields.boolean_terms)
            .filter_map(|v| v.as_text().map(|s| s.to_string()))
            .collect();
        RetrievedDocument { id, docid, data, values, terms }
    }

    pub fn get_value(&self, id: &str, slot_id: u32) -> anyhow::Result<Option<StoredValue>> {
        Ok(self
            .get_document(id)?
            .and_then(|d| d.values.get(&slot_id).cloned()))
    }

    pub fn get_data(&self, id: &str) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.get_document(id)?.map(|d| d.data))
    }

    pub fn termlist(&self, id: &str) -> anyhow::Result<Vec<String>> {
        Ok(self.get_document(id)?.map(|d| d.terms).unwrap_or_default())
    }

    pub fn doclength(&self, id: &str) -> anyhow::Result<u64> {
        Ok(self.termlist(id)?.len() as u64)
    }

    /// All indexed boolean terms carrying the given prefix (spec §6.1
    /// `TERMS`/`FACETS` rely on this indirectly via the executor).
    pub fn allterms(&self, prefix: &str) -> anyhow::Result<Vec<String>> {
        let searcher = self.searcher();
        let mut out = Vec::new();
        for segment_reader in searcher.segment_readers() {
            let inv_idx = segment_reader.inverted_index(self.fields.boolean_terms)?;
            let term_dict = inv_idx.terms();
            let mut stream = term_dict.stream()?;
            while let Some((term_bytes, _)) = stream.next() {
                if let Ok(s) = std::str::from_utf8(term_bytes) {
                    if s.starts_with(prefix) {
                        out.push(s.to_string());
                    }
                }
            }
        }
        Ok(out)
    }

    /// Applies a replace (upsert) — deletes any prior document under the
    /// same `Q<id>` term and adds the new one, so that indexing twice with
    /// the same id yields exactly one document (spec §8 invariant #7).
    pub fn replace_document(&self, doc: EngineDocument) -> Result<(), EngineError> {
        let mut guard = self.writer.lock();
        let writer = guard
            .as_mut()
            .ok_or_else(|| EngineError::Index(anyhow::anyhow!("database is not writable")))?;

        let unique_term = Term::from_field_text(self.fields.id, &doc.id);
        writer.delete_term(unique_term);

        let mut tdoc = tantivy::Document::new();
        tdoc.add_text(self.fields.id, &doc.id);
        tdoc.add_bytes(self.fields.data, doc.data);
        let values_blob = bincode::serialize(&doc.values)
            .map_err(|e| EngineError::InvalidArgument(e.to_string()))?;
        tdoc.add_bytes(self.fields.values, values_blob);

        for term in &doc.boolean_terms {
            tdoc.add_text(self.fields.boolean_terms, term);
        }
        // The unique-key term is also stored as a boolean term so
        // `termlist`/replace-by-term semantics are symmetric (spec §4.4).
        tdoc.add_text(self.fields.boolean_terms, &slot::unique_key_term(&doc.id));

        for term in &doc.free_terms {
            // tantivy has no notion of a static per-posting weight the
            // way Xapian's `WeightedTerm` does; approximate it by
            // repeating the posting so a heavier term contributes more
            // term frequency to any scored query that reaches it.
            let repeats = term.weight.clamp(1, 10);
            for _ in 0..repeats {
                tdoc.add_text(self.fields.boolean_terms, &term.text);
            }
            let _ = term.position; // no positional boolean-term index to honor this against.
        }

        for text in &doc.free_texts {
            let field = if text.positions { self.fields.text } else { self.fields.text_nopos };
            let stemmed = text.language.as_deref().and_then(stemmer_language).map(|lang| stem_tokens(&text.text, lang));

            // Without `spelling`, a recognized language indexes only the
            // stemmed form; with it (or with no stemmer at all) the
            // original text is also kept, so a literal query term still
            // matches after stemming would otherwise have collapsed it.
            let keep_raw = stemmed.is_none() || text.spelling;

            let repeats = text.weight.clamp(1, 10);
            for _ in 0..repeats {
                if keep_raw {
                    tdoc.add_text(field, &text.text);
                }
                if let Some(tokens) = &stemmed {
                    if !tokens.is_empty() {
                        tdoc.add_text(field, &tokens.join(" "));
                    }
                }
            }

            if let Some(prefix) = &text.prefix {
                let marker = prefix.to_uppercase();
                let tokens = stemmed.clone().unwrap_or_else(|| lower_tokens(&text.text));
                for token in &tokens {
                    tdoc.add_text(self.fields.boolean_terms, &format!("{}{}", marker, token));
                }
            }
        }

        writer.add_document(tdoc);
        Ok(())
    }

    pub fn delete_document(&self, id: &str) -> Result<(), EngineError> {
        let mut guard = self.writer.lock();
        let writer = guard
            .as_mut()
            .ok_or_else(|| EngineError::Index(anyhow::anyhow!("database is not writable")))?;
        writer.delete_term(Term::from_field_text(self.fields.id, id));
        Ok(())
    }

    /// Parses a SEARCH clause's free-text string against the `text` field,
    /// the same `QueryParser`-driven path as teacher's `parse_query` in
    /// `QueryMode::Normal` (spec §4.7).
    pub fn free_text_query(&self, text: &str) -> Box<dyn Query> {
        let qp = QueryParser::for_index(&self.index, vec![self.fields.text, self.fields.text_nopos]);
        qp.parse_query(text)
            .unwrap_or_else(|_| Box::new(tantivy::query::AllQuery))
    }

    /// Builds an autocomplete-style prefix query for a PARTIAL clause,
    /// reusing teacher's `FuzzyTermQuery::new_prefix` idiom with zero edit
    /// distance for literal-prefix matching (spec §4.7), OR'd across both
    /// the positional and non-positional text fields.
    pub fn prefix_query(&self, prefix: &str) -> Box<dyn Query> {
        let lowered = prefix.to_lowercase();
        let fuzzy = |field: Field| -> Box<dyn Query> {
            Box::new(FuzzyTermQuery::new_prefix(
                Term::from_field_text(field, &lowered),
                0,
                true,
            ))
        };
        Box::new(BooleanQuery::from(vec![
            (Occur::Should, fuzzy(self.fields.text)),
            (Occur::Should, fuzzy(self.fields.text_nopos)),
        ]))
    }

    /// An exact boolean-term filter, used for TERMS clauses (spec §4.7).
    pub fn boolean_term_query(&self, term: &str) -> Box<dyn Query> {
        Box::new(TermQuery::new(
            Term::from_field_text(self.fields.boolean_terms, term),
            IndexRecordOption::Basic,
        ))
    }

    pub fn commit(&self) -> Result<(), EngineError> {
        {
            let mut guard = self.writer.lock();
            let writer = guard
                .as_mut()
                .ok_or_else(|| EngineError::Index(anyhow::anyhow!("database is not writable")))?;
            writer
                .commit()
                .map_err(|e| EngineError::Transient(e.to_string()))?;
        }
        self.reopen()
            .map_err(|e| EngineError::Transient(e.to_string()))?;
        Ok(())
    }
}

/// Strips leading slashes and replaces remaining path separators so an
/// endpoint path can be used as a data-directory component.
fn sanitize(path: &str) -> String {
    path.trim_start_matches('/').replace('/', "_")
}

/// A reader-only view over N endpoints treated as one searchable unit
/// (spec §3 "Composite index"). Writes are disallowed at this layer; the
/// pool enforces that writable composites hold exactly one endpoint.
pub struct CompositeDatabase {
    subs: Vec<Arc<SingleDatabase>>,
}

impl CompositeDatabase {
    pub fn new(subs: Vec<Arc<SingleDatabase>>) -> Self {
        Self { subs }
    }

    pub fn subs(&self) -> &[Arc<SingleDatabase>] {
        &self.subs
    }

    pub fn get_doccount(&self) -> u64 {
        self.subs.iter().map(|s| s.get_doccount()).sum()
    }

    pub fn get_document(&self, id: &str) -> anyhow::Result<Option<RetrievedDocument>> {
        for sub in &self.subs {
            if let Some(doc) = sub.get_document(id)? {
                return Ok(Some(doc));
            }
        }
        Ok(None)
    }

    pub fn reopen(&self) -> anyhow::Result<()> {
        for sub in &self.subs {
            sub.reopen()?;
        }
        Ok(())
    }

    pub fn searchers(&self) -> Vec<Searcher> {
        self.subs.iter().map(|s| s.searcher()).collect()
    }

    pub fn fields(&self) -> &Fields {
        self.subs[0].fields()
    }
}

/// Runs a boxed tantivy query against a single searcher, returning scored
/// doc addresses. Kept here (rather than in the executor) since it is the
/// one place a `Query` meets a `Searcher`+schema pair for a given
/// sub-index.
pub fn run_query(
    searcher: &Searcher,
    query: &dyn Query,
    limit: usize,
    offset: usize,
) -> anyhow::Result<Vec<(tantivy::Score, tantivy::DocAddress)>> {
    let collector = TopDocs::with_limit(limit).and_offset(offset);
    Ok(searcher.search(query, &collector)?)
}
