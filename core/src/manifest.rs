use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::{DocLocation, Error, Result};

/// Maps a document id to its canonical URL.
pub trait UrlResolver: Send + Sync {
    /// `None` means "omit from results", never a failure.
    fn resolve(&self, doc_id: &str) -> Option<String>;
}

/// The corpus bookkeeping file: a JSON object of `"folder/file" -> url`.
///
/// It doubles as the build manifest (its keys) and the URL mapping (its values).
#[derive(Debug, Clone, Default)]
pub struct Bookkeeping {
    entries: BTreeMap<String, String>,
}

impl Bookkeeping {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let f = File::open(path).map_err(|e| Error::Manifest(format!("{}: {e}", path.display())))?;
        let entries: BTreeMap<String, String> = serde_json::from_reader(BufReader::new(f))
            .map_err(|e| Error::Manifest(format!("{}: {e}", path.display())))?;
        Ok(Self { entries })
    }

    pub fn from_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self { entries: entries.into_iter().map(|(k, v)| (k.into(), v.into())).collect() }
    }

    pub fn len(&self) -> usize { self.entries.len() }

    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    /// Document locations in key order. Any malformed key fails the whole manifest.
    pub fn resolve_manifest(&self) -> Result<Vec<DocLocation>> {
        self.entries
            .keys()
            .map(|key| DocLocation::parse(key).ok_or_else(|| Error::Manifest(format!("malformed document key {key:?}"))))
            .collect()
    }
}

impl UrlResolver for Bookkeeping {
    fn resolve(&self, doc_id: &str) -> Option<String> {
        self.entries.get(doc_id).filter(|url| !url.trim().is_empty()).cloned()
    }
}

/// Prefix `http://` unless the url already carries an http(s) scheme.
pub fn with_protocol(url: &str) -> String {
    if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("http://{url}")
    }
}
