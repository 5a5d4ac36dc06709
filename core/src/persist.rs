use crate::store::{PostingsStore, TermIter};
use crate::{Error, Posting, Result, TermRow, TfIdfUpdate};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sled::transaction::{ConflictableTransactionError, TransactionError, TransactionResult, Transactional};
use std::collections::BTreeMap;
use std::fs::{create_dir_all, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaFile {
    pub documents_indexed: usize,
    pub documents_skipped: usize,
    pub terms: usize,
    pub created_at: String,
    pub version: u32,
}

pub struct IndexPaths {
    pub root: PathBuf,
}

impl IndexPaths {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }
    pub fn db(&self) -> PathBuf { self.root.join("postings.sled") }
    pub fn meta(&self) -> PathBuf { self.root.join("meta.json") }
    pub fn analytics(&self) -> PathBuf { self.root.join("analytics.txt") }
}

pub fn save_meta(paths: &IndexPaths, meta: &MetaFile) -> Result<()> {
    create_dir_all(&paths.root)?;
    let mut f = File::create(paths.meta())?;
    let json = serde_json::to_string_pretty(meta)?;
    f.write_all(json.as_bytes())?;
    Ok(())
}

pub fn load_meta(paths: &IndexPaths) -> Result<MetaFile> {
    let mut f = File::open(paths.meta())?;
    let mut buf = String::new();
    f.read_to_string(&mut buf)?;
    let meta: MetaFile = serde_json::from_str(&buf)?;
    Ok(meta)
}

/// Durable postings store backed by two sled trees: `postings` (lemma -> bincode postings
/// list) and `documents` (document id -> empty value).
pub struct SledStore {
    db: sled::Db,
    postings: sled::Tree,
    documents: sled::Tree,
}

impl SledStore {
    pub fn open(paths: &IndexPaths) -> Result<Self> {
        create_dir_all(&paths.root)?;
        Self::from_db(sled::open(paths.db())?)
    }

    /// Deleted when dropped.
    pub fn temporary() -> Result<Self> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: sled::Db) -> Result<Self> {
        let postings = db.open_tree("postings")?;
        let documents = db.open_tree("documents")?;
        Ok(Self { db, postings, documents })
    }
}

fn decode(bytes: &[u8]) -> Result<Vec<Posting>> { Ok(bincode::deserialize(bytes)?) }

fn abort<E: ToString>(err: E) -> ConflictableTransactionError<String> {
    ConflictableTransactionError::Abort(err.to_string())
}

fn into_write_failure(key: &str, err: TransactionError<String>) -> Error {
    match err {
        TransactionError::Abort(reason) => Error::write_failure(key, reason),
        TransactionError::Storage(err) => Error::write_failure(key, err),
    }
}

/// Run sled work on the blocking pool so the caller's future suspends and can be timed out.
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Task(e.to_string()))?
}

fn append_postings(terms: &sled::Tree, docs: &sled::Tree, location: &str, postings: &[(String, Posting)]) -> Result<()> {
    let result: TransactionResult<(), String> = (terms, docs).transaction(|(terms, docs)| {
        for (lemma, posting) in postings {
            let mut list = match terms.get(lemma.as_bytes())? {
                Some(bytes) => decode(&bytes).map_err(abort)?,
                None => Vec::new(),
            };
            list.push(posting.clone());
            let bytes = bincode::serialize(&list).map_err(abort)?;
            terms.insert(lemma.as_bytes(), bytes)?;
        }
        docs.insert(location.as_bytes(), Vec::<u8>::new())?;
        Ok(())
    });
    result.map_err(|e| into_write_failure(location, e))
}

fn set_tf_idf(terms: &sled::Tree, updates: &[TfIdfUpdate]) -> Result<()> {
    let mut by_lemma: BTreeMap<&str, Vec<&TfIdfUpdate>> = BTreeMap::new();
    for update in updates {
        by_lemma.entry(update.lemma.as_str()).or_default().push(update);
    }
    for (lemma, group) in by_lemma {
        let result: TransactionResult<(), String> = terms.transaction(|terms| {
            let Some(bytes) = terms.get(lemma.as_bytes())? else { return Ok(()) };
            let mut list = decode(&bytes).map_err(abort)?;
            for update in &group {
                if let Some(p) = list.iter_mut().find(|p| p.location == update.location) {
                    p.tf_idf = Some(update.tf_idf);
                }
            }
            let bytes = bincode::serialize(&list).map_err(abort)?;
            terms.insert(lemma.as_bytes(), bytes)?;
            Ok(())
        });
        result.map_err(|e| into_write_failure(lemma, e))?;
    }
    Ok(())
}

#[async_trait]
impl PostingsStore for SledStore {
    async fn count(&self) -> Result<usize> {
        let terms = self.postings.clone();
        blocking(move || Ok(terms.len())).await
    }

    async fn batch_upsert_postings(&self, location: &str, postings: Vec<(String, Posting)>) -> Result<()> {
        if postings.is_empty() { return Ok(()); }
        let (terms, docs) = (self.postings.clone(), self.documents.clone());
        let location = location.to_string();
        blocking(move || append_postings(&terms, &docs, &location, &postings)).await
    }

    async fn get_term_row(&self, lemma: &str) -> Result<Option<TermRow>> {
        let terms = self.postings.clone();
        let lemma = lemma.to_string();
        blocking(move || match terms.get(lemma.as_bytes())? {
            Some(bytes) => Ok(Some(TermRow { postings: decode(&bytes)?, lemma })),
            None => Ok(None),
        })
        .await
    }

    async fn distinct_document_count(&self) -> Result<usize> {
        let docs = self.documents.clone();
        blocking(move || Ok(docs.len())).await
    }

    fn iterate_all_terms(&self) -> TermIter<'_> {
        Box::new(self.postings.iter().map(|item| {
            let (key, value) = item?;
            Ok(TermRow { lemma: String::from_utf8_lossy(&key).into_owned(), postings: decode(&value)? })
        }))
    }

    async fn batch_set_tfidf(&self, updates: Vec<TfIdfUpdate>) -> Result<()> {
        let terms = self.postings.clone();
        blocking(move || set_tf_idf(&terms, &updates)).await
    }

    fn size_on_disk(&self) -> Result<u64> { Ok(self.db.size_on_disk()?) }

    async fn clear(&self) -> Result<()> {
        let (terms, docs) = (self.postings.clone(), self.documents.clone());
        blocking(move || {
            terms.clear()?;
            docs.clear()?;
            Ok(())
        })
        .await
    }

    async fn flush(&self) -> Result<()> {
        self.db.flush_async().await?;
        Ok(())
    }
}
