use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};

use crate::{Posting, Result, TermRow, TfIdfUpdate};

pub type TermIter<'a> = Box<dyn Iterator<Item = Result<TermRow>> + Send + 'a>;

/// Keyed table of lemma -> postings list.
///
/// All mutation is additive (append, or set a field on an existing posting), so writes from
/// different documents may land in any order.
#[async_trait]
pub trait PostingsStore: Send + Sync {
    /// Number of term rows.
    async fn count(&self) -> Result<usize>;

    /// Append one document's postings to their term rows as a single batch, creating missing rows.
    async fn batch_upsert_postings(&self, location: &str, postings: Vec<(String, Posting)>) -> Result<()>;

    async fn get_term_row(&self, lemma: &str) -> Result<Option<TermRow>>;

    /// Distinct document ids across all postings lists.
    async fn distinct_document_count(&self) -> Result<usize>;

    /// Single pass over every term row.
    fn iterate_all_terms(&self) -> TermIter<'_>;

    async fn batch_set_tfidf(&self, updates: Vec<TfIdfUpdate>) -> Result<()>;

    fn size_on_disk(&self) -> Result<u64>;

    /// Drop every term row and document.
    async fn clear(&self) -> Result<()>;

    async fn flush(&self) -> Result<()> { Ok(()) }
}

#[derive(Default)]
struct Tables {
    terms: BTreeMap<String, Vec<Posting>>,
    documents: BTreeSet<String>,
}

/// In-process store. Iteration is over a snapshot taken when the pass starts.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }
}

#[async_trait]
impl PostingsStore for MemoryStore {
    async fn count(&self) -> Result<usize> { Ok(self.tables.read().terms.len()) }

    async fn batch_upsert_postings(&self, location: &str, postings: Vec<(String, Posting)>) -> Result<()> {
        if postings.is_empty() { return Ok(()); }
        let mut tables = self.tables.write();
        for (lemma, posting) in postings {
            tables.terms.entry(lemma).or_default().push(posting);
        }
        tables.documents.insert(location.to_string());
        Ok(())
    }

    async fn get_term_row(&self, lemma: &str) -> Result<Option<TermRow>> {
        let tables = self.tables.read();
        Ok(tables.terms.get(lemma).map(|postings| TermRow { lemma: lemma.to_string(), postings: postings.clone() }))
    }

    async fn distinct_document_count(&self) -> Result<usize> { Ok(self.tables.read().documents.len()) }

    fn iterate_all_terms(&self) -> TermIter<'_> {
        let rows: Vec<TermRow> = self
            .tables
            .read()
            .terms
            .iter()
            .map(|(lemma, postings)| TermRow { lemma: lemma.clone(), postings: postings.clone() })
            .collect();
        Box::new(rows.into_iter().map(Ok))
    }

    async fn batch_set_tfidf(&self, updates: Vec<TfIdfUpdate>) -> Result<()> {
        let mut tables = self.tables.write();
        for update in updates {
            if let Some(postings) = tables.terms.get_mut(&update.lemma) {
                if let Some(p) = postings.iter_mut().find(|p| p.location == update.location) {
                    p.tf_idf = Some(update.tf_idf);
                }
            }
        }
        Ok(())
    }

    fn size_on_disk(&self) -> Result<u64> {
        let tables = self.tables.read();
        let mut total = 0u64;
        for (lemma, postings) in tables.terms.iter() {
            total += lemma.len() as u64 + bincode::serialized_size(postings)?;
        }
        Ok(total)
    }

    async fn clear(&self) -> Result<()> {
        *self.tables.write() = Tables::default();
        Ok(())
    }
}
