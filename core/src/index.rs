use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Opaque document identifier, the `folder/file` form of a [`DocLocation`].
pub type DocId = String;

/// Corpus-relative location of a document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocLocation {
    pub folder: String,
    pub file: String,
}

impl DocLocation {
    pub fn new(folder: impl Into<String>, file: impl Into<String>) -> Self {
        Self { folder: folder.into(), file: file.into() }
    }

    /// Parse a `folder/file` key. Both halves must be non-empty and there must be exactly one separator.
    pub fn parse(key: &str) -> Option<Self> {
        let (folder, file) = key.split_once('/')?;
        if folder.is_empty() || file.is_empty() || file.contains('/') {
            return None;
        }
        Some(Self::new(folder, file))
    }

    pub fn doc_id(&self) -> DocId { self.to_string() }

    pub fn path_under(&self, root: &Path) -> PathBuf { root.join(&self.folder).join(&self.file) }
}

impl fmt::Display for DocLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.folder, self.file)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Posting {
    pub location: DocId,
    /// occurrences / distinct lemmas in the document
    pub tf: f64,
    pub html_weight: f64,
    /// Set by the IDF backfill; absent while a build is in progress.
    pub tf_idf: Option<f64>,
}

impl Posting {
    pub fn new(location: DocId, tf: f64, html_weight: f64) -> Self {
        Self { location, tf, html_weight, tf_idf: None }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TermRow {
    pub lemma: String,
    pub postings: Vec<Posting>, // append order
}

impl TermRow {
    pub fn document_frequency(&self) -> usize { self.postings.len() }
}

/// Running per-lemma totals for one document.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LemmaStats {
    pub occurrences: u32,
    pub html_weight: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TfIdfUpdate {
    pub lemma: String,
    pub location: DocId,
    pub tf_idf: f64,
}

/// `ln(total_docs / df)`, zero when either side is zero.
pub fn idf(total_docs: usize, df: usize) -> f64 {
    if df == 0 || total_docs == 0 {
        return 0.0;
    }
    (total_docs as f64 / df as f64).ln()
}
