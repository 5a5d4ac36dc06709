use std::fmt;
use std::fs;
use std::path::Path;

use crate::query::QueryEngine;
use crate::store::PostingsStore;
use crate::Result;

pub const SAMPLE_QUERIES: [&str; 3] = ["informatics", "mondego", "irvine"];
const URLS_SHOWN: usize = 20;

#[derive(Debug, Clone, PartialEq)]
pub struct QueryReport {
    pub query: String,
    pub urls: Vec<String>,
}

/// Post-build summary: corpus and store counters plus a few sample queries.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyticsReport {
    pub documents_indexed: usize,
    pub store_bytes: u64,
    pub distinct_terms: usize,
    pub queries: Vec<QueryReport>,
}

impl AnalyticsReport {
    pub async fn generate(
        engine: &QueryEngine,
        store: &dyn PostingsStore,
        documents_indexed: usize,
        queries: &[&str],
    ) -> Result<Self> {
        let mut reports = Vec::with_capacity(queries.len());
        for query in queries {
            let urls = engine.query(query).await?;
            reports.push(QueryReport { query: query.to_string(), urls });
        }
        Ok(Self {
            documents_indexed,
            store_bytes: store.size_on_disk()?,
            distinct_terms: store.count().await?,
            queries: reports,
        })
    }

    pub fn write_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, self.to_string())?;
        Ok(())
    }
}

impl fmt::Display for AnalyticsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Index Analytics\n")?;
        writeln!(f, "Total number of documents: {}\n", self.documents_indexed)?;
        writeln!(f, "Total size of index on disk: {} KB\n", self.store_bytes as f64 / 1024.0)?;
        writeln!(f, "Number of unique words: {}\n", self.distinct_terms)?;
        writeln!(f, "Testing Queries")?;
        for q in &self.queries {
            writeln!(f, "Query: {}", q.query)?;
            writeln!(f, "Number of URLs retrieved: {}", q.urls.len())?;
            writeln!(f, "First {URLS_SHOWN} URLs:")?;
            for url in q.urls.iter().take(URLS_SHOWN) {
                writeln!(f, "{url}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
