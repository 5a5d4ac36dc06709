use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::html::{parse_tags, tag_weight, TagText};
use crate::store::PostingsStore;
use crate::tokenizer::Tokenizer;
use crate::{idf, DocId, DocLocation, Error, LemmaStats, Posting, Result, TfIdfUpdate};

pub const DEFAULT_CONCURRENCY: usize = 3;
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Clone)]
pub struct BuildConfig {
    pub corpus_root: PathBuf,
    /// Documents in flight at once.
    pub concurrency: usize,
    /// Applied to each document's batched write.
    pub write_timeout: Duration,
}

impl BuildConfig {
    pub fn new<P: Into<PathBuf>>(corpus_root: P) -> Self {
        Self { corpus_root: corpus_root.into(), concurrency: DEFAULT_CONCURRENCY, write_timeout: DEFAULT_WRITE_TIMEOUT }
    }

    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(Error::Config("concurrency must be at least 1".into()));
        }
        if self.write_timeout.is_zero() {
            return Err(Error::Config("write timeout must be non-zero".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildState {
    Empty,
    Building,
    Built,
}

/// Result of processing one manifest entry.
#[derive(Debug)]
pub enum DocOutcome {
    Indexed { location: DocId, lemmas: usize },
    /// Parsed fine but produced no indexable lemmas; nothing is written.
    Empty(DocId),
    Skipped(Error),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackfillReport {
    pub total_documents: usize,
    pub terms_updated: usize,
    pub terms_failed: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildReport {
    /// The store was already populated and nothing ran.
    pub already_built: bool,
    pub documents_indexed: usize,
    pub documents_empty: usize,
    pub parse_failures: usize,
    pub write_timeouts: usize,
    pub write_failures: usize,
    pub backfill: BackfillReport,
}

impl BuildReport {
    pub fn documents_skipped(&self) -> usize {
        self.parse_failures + self.write_timeouts + self.write_failures
    }

    fn record(&mut self, outcome: DocOutcome) {
        match outcome {
            DocOutcome::Indexed { .. } => self.documents_indexed += 1,
            DocOutcome::Empty(_) => self.documents_empty += 1,
            DocOutcome::Skipped(Error::WriteTimeout { .. }) => self.write_timeouts += 1,
            DocOutcome::Skipped(Error::Parse { .. }) => self.parse_failures += 1,
            DocOutcome::Skipped(_) => self.write_failures += 1,
        }
    }
}

/// Accumulate occurrence counts and tag weights per lemma over every tag of a document.
pub fn weigh_tags(tokenizer: &Tokenizer, tags: &[TagText]) -> BTreeMap<String, LemmaStats> {
    let mut lemmas: BTreeMap<String, LemmaStats> = BTreeMap::new();
    for tag in tags {
        let weight = tag_weight(&tag.tag_name);
        for lemma in tokenizer.tokenize_and_stem(&tag.text, true) {
            let stats = lemmas.entry(lemma).or_default();
            stats.occurrences += 1;
            stats.html_weight += weight;
        }
    }
    lemmas
}

/// One posting per lemma with `tf = occurrences / distinct lemmas`.
pub fn postings_for(location: &str, lemmas: &BTreeMap<String, LemmaStats>) -> Vec<(String, Posting)> {
    let distinct = lemmas.len() as f64;
    lemmas
        .iter()
        .map(|(lemma, stats)| {
            let tf = stats.occurrences as f64 / distinct;
            (lemma.clone(), Posting::new(location.to_string(), tf, stats.html_weight))
        })
        .collect()
}

/// One-shot ingestion of a corpus into an empty postings store.
pub struct IndexBuilder {
    store: Arc<dyn PostingsStore>,
    tokenizer: Arc<Tokenizer>,
    config: BuildConfig,
    state: Mutex<BuildState>,
}

impl IndexBuilder {
    pub fn new(store: Arc<dyn PostingsStore>, tokenizer: Arc<Tokenizer>, config: BuildConfig) -> Self {
        Self { store, tokenizer, config, state: Mutex::new(BuildState::Empty) }
    }

    pub fn state(&self) -> BuildState { *self.state.lock() }

    /// Index every manifest entry, then backfill tf-idf over the whole store.
    ///
    /// A non-empty store short-circuits to [`BuildState::Built`] without touching it.
    /// Per-document and per-term failures are counted in the report; only configuration
    /// and store-level failures return `Err`.
    pub async fn build(&self, manifest: &[DocLocation]) -> Result<BuildReport> {
        self.config.validate()?;
        let existing = self.store.count().await?;
        if existing > 0 {
            *self.state.lock() = BuildState::Built;
            info!(terms = existing, "index already built, skipping");
            return Ok(BuildReport { already_built: true, ..Default::default() });
        }
        *self.state.lock() = BuildState::Building;
        info!(documents = manifest.len(), concurrency = self.config.concurrency, "building index");

        let outcomes: Vec<DocOutcome> = stream::iter(manifest.iter().cloned())
            .map(|location| self.index_document(location))
            .buffer_unordered(self.config.concurrency)
            .collect()
            .await;

        let mut report = BuildReport::default();
        for outcome in outcomes {
            report.record(outcome);
        }
        info!(
            indexed = report.documents_indexed,
            skipped = report.documents_skipped(),
            empty = report.documents_empty,
            "document pass complete"
        );

        report.backfill = self.backfill_tf_idf().await?;
        self.store.flush().await?;
        *self.state.lock() = BuildState::Built;
        info!(
            documents = report.backfill.total_documents,
            terms = report.backfill.terms_updated,
            failed_terms = report.backfill.terms_failed,
            "tf-idf backfill complete"
        );
        Ok(report)
    }

    async fn index_document(&self, location: DocLocation) -> DocOutcome {
        let doc_id = location.doc_id();
        let path = location.path_under(&self.config.corpus_root);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) => return self.skip(Error::parse(doc_id, e)),
        };
        let tags = match parse_tags(&raw) {
            Ok(tags) => tags,
            Err(e) => return self.skip(Error::parse(doc_id, e)),
        };

        let lemmas = weigh_tags(&self.tokenizer, &tags);
        if lemmas.is_empty() {
            debug!(location = %doc_id, "no indexable terms");
            return DocOutcome::Empty(doc_id);
        }
        let postings = postings_for(&doc_id, &lemmas);

        let write = self.store.batch_upsert_postings(&doc_id, postings);
        match tokio::time::timeout(self.config.write_timeout, write).await {
            Ok(Ok(())) => {
                debug!(location = %doc_id, lemmas = lemmas.len(), "indexed document");
                DocOutcome::Indexed { location: doc_id, lemmas: lemmas.len() }
            }
            Ok(Err(Error::WriteFailure { reason, .. })) => self.skip(Error::WriteFailure { location: doc_id, reason }),
            Ok(Err(e)) => self.skip(Error::write_failure(doc_id, e)),
            Err(_) => self.skip(Error::WriteTimeout { location: doc_id, timeout: self.config.write_timeout }),
        }
    }

    fn skip(&self, err: Error) -> DocOutcome {
        warn!(%err, "skipping document");
        DocOutcome::Skipped(err)
    }

    /// Set `tf_idf = tf * ln(N / df)` on every posting. Must run after all document writes settle.
    pub async fn backfill_tf_idf(&self) -> Result<BackfillReport> {
        let total_documents = self.store.distinct_document_count().await?;
        let mut report = BackfillReport { total_documents, ..Default::default() };

        for row in self.store.iterate_all_terms() {
            let row = match row {
                Ok(row) => row,
                Err(err) => {
                    warn!(%err, "unreadable term row");
                    report.terms_failed += 1;
                    continue;
                }
            };
            let term_idf = idf(total_documents, row.document_frequency());
            let updates: Vec<TfIdfUpdate> = row
                .postings
                .iter()
                .map(|p| TfIdfUpdate { lemma: row.lemma.clone(), location: p.location.clone(), tf_idf: p.tf * term_idf })
                .collect();
            match self.store.batch_set_tfidf(updates).await {
                Ok(()) => {
                    debug!(lemma = %row.lemma, df = row.document_frequency(), idf = term_idf, "backfilled");
                    report.terms_updated += 1;
                }
                Err(err) => {
                    warn!(lemma = %row.lemma, %err, "tf-idf backfill failed");
                    report.terms_failed += 1;
                }
            }
        }
        Ok(report)
    }
}
