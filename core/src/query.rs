use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::manifest::{with_protocol, UrlResolver};
use crate::store::PostingsStore;
use crate::tokenizer::Tokenizer;
use crate::{idf, DocId, Error, Result, TermRow};

pub const DEFAULT_TOP_N: usize = 20;
/// Scales a posting's html weight into a small additive boost.
pub const HTML_WEIGHT_DIVISOR: f64 = 10_000.0;

#[derive(Debug, Clone)]
pub struct QueryConfig {
    pub top_n: usize,
    /// Divide the dot product by both vector norms (true cosine similarity).
    pub normalize: bool,
    /// Apply the indexing-side stop-word and length filters to queries too.
    pub filter_query_terms: bool,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self { top_n: DEFAULT_TOP_N, normalize: false, filter_query_terms: false }
    }
}

/// Query tf-idf weights keyed by lemma, plus their Euclidean norm.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryVector {
    pub weights: BTreeMap<String, f64>,
    pub norm: f64,
}

impl QueryVector {
    /// `counts` are raw lemma counts; `rows` holds the term rows that exist in the store.
    pub fn build(counts: &BTreeMap<String, u32>, rows: &BTreeMap<String, TermRow>, total_documents: usize) -> Self {
        let distinct = counts.len() as f64;
        let weights: BTreeMap<String, f64> = counts
            .iter()
            .map(|(lemma, count)| {
                let tf = *count as f64 / distinct;
                let df = rows.get(lemma).map(TermRow::document_frequency).unwrap_or(0);
                (lemma.clone(), tf * idf(total_documents, df))
            })
            .collect();
        let norm = weights.values().map(|w| w * w).sum::<f64>().sqrt();
        Self { weights, norm }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredDoc {
    pub doc_id: DocId,
    pub score: f64,
}

/// Ranks documents for free-text queries against a built store.
pub struct QueryEngine {
    store: Arc<dyn PostingsStore>,
    tokenizer: Arc<Tokenizer>,
    resolver: Arc<dyn UrlResolver>,
    config: QueryConfig,
    total_documents: usize,
}

impl QueryEngine {
    /// Reads the corpus size once; reopen after a rebuild.
    pub async fn open(
        store: Arc<dyn PostingsStore>,
        tokenizer: Arc<Tokenizer>,
        resolver: Arc<dyn UrlResolver>,
        config: QueryConfig,
    ) -> Result<Self> {
        let total_documents = store.distinct_document_count().await?;
        Ok(Self { store, tokenizer, resolver, config, total_documents })
    }

    pub fn total_documents(&self) -> usize { self.total_documents }

    pub fn config(&self) -> &QueryConfig { &self.config }

    /// Lemma multiset of the query text.
    pub fn query_lemmas(&self, text: &str) -> BTreeMap<String, u32> {
        let mut counts = BTreeMap::new();
        for lemma in self.tokenizer.tokenize_and_stem(text, self.config.filter_query_terms) {
            *counts.entry(lemma).or_insert(0) += 1;
        }
        counts
    }

    async fn fetch_rows(&self, counts: &BTreeMap<String, u32>) -> Result<BTreeMap<String, TermRow>> {
        let mut rows = BTreeMap::new();
        for lemma in counts.keys() {
            match self.store.get_term_row(lemma).await? {
                Some(row) => { rows.insert(lemma.clone(), row); }
                None => debug!(err = %Error::MissingTerm(lemma.clone()), "zero weight"),
            }
        }
        Ok(rows)
    }

    pub async fn query_vector(&self, text: &str) -> Result<QueryVector> {
        let counts = self.query_lemmas(text);
        let rows = self.fetch_rows(&counts).await?;
        Ok(QueryVector::build(&counts, &rows, self.total_documents))
    }

    /// Top-N documents by descending score; ties go to the smaller document id.
    pub async fn rank(&self, text: &str) -> Result<Vec<ScoredDoc>> {
        let counts = self.query_lemmas(text);
        if counts.is_empty() {
            return Ok(Vec::new());
        }
        let rows = self.fetch_rows(&counts).await?;
        let query = QueryVector::build(&counts, &rows, self.total_documents);

        let mut scores: BTreeMap<DocId, f64> = BTreeMap::new();
        let mut doc_vectors: BTreeMap<DocId, BTreeMap<&str, f64>> = BTreeMap::new();
        for (lemma, row) in &rows {
            let term_idf = idf(self.total_documents, row.document_frequency());
            for posting in &row.postings {
                // postings written mid-build have no tf_idf yet
                let tf_idf = match posting.tf_idf {
                    Some(v) => v,
                    None if term_idf != 0.0 => posting.tf / term_idf,
                    None => 0.0,
                };
                doc_vectors.entry(posting.location.clone()).or_default().insert(lemma.as_str(), tf_idf);
                *scores.entry(posting.location.clone()).or_insert(0.0) += posting.html_weight / HTML_WEIGHT_DIVISOR;
            }
        }

        for (doc_id, vector) in &doc_vectors {
            let mut similarity: f64 = vector.iter().map(|(lemma, tf_idf)| query.weights[*lemma] * tf_idf).sum();
            if self.config.normalize {
                let doc_norm = vector.values().map(|w| w * w).sum::<f64>().sqrt();
                similarity = if query.norm > 0.0 && doc_norm > 0.0 { similarity / (query.norm * doc_norm) } else { 0.0 };
            }
            *scores.entry(doc_id.clone()).or_insert(0.0) += similarity;
        }

        let mut ranked: Vec<ScoredDoc> = scores.into_iter().map(|(doc_id, score)| ScoredDoc { doc_id, score }).collect();
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.doc_id.cmp(&b.doc_id)));
        ranked.truncate(self.config.top_n);
        Ok(ranked)
    }

    /// Ranked URLs for `text`. Documents without a URL are left out.
    pub async fn query(&self, text: &str) -> Result<Vec<String>> {
        let ranked = self.rank(text).await?;
        let mut urls = Vec::with_capacity(ranked.len());
        for doc in ranked {
            match self.resolver.resolve(&doc.doc_id) {
                Some(url) => urls.push(with_protocol(&url)),
                None => warn!(err = %Error::Resolution(doc.doc_id), "omitting result"),
            }
        }
        Ok(urls)
    }
}
