use async_trait::async_trait;
use htmlrank_core::analytics::{AnalyticsReport, SAMPLE_QUERIES};
use htmlrank_core::builder::{BuildConfig, BuildState, IndexBuilder};
use htmlrank_core::manifest::{Bookkeeping, UrlResolver};
use htmlrank_core::persist::SledStore;
use htmlrank_core::query::{QueryConfig, QueryEngine};
use htmlrank_core::store::{MemoryStore, PostingsStore, TermIter};
use htmlrank_core::tokenizer::Tokenizer;
use htmlrank_core::{DocLocation, Error, Posting, Result, TermRow, TfIdfUpdate};
use std::collections::HashSet;
use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn write_corpus(docs: &[(&str, &str)]) -> (TempDir, Vec<DocLocation>) {
    let dir = tempfile::tempdir().unwrap();
    let mut locations = Vec::new();
    for (key, html) in docs {
        let loc = DocLocation::parse(key).unwrap();
        let path = loc.path_under(dir.path());
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, html).unwrap();
        locations.push(loc);
    }
    (dir, locations)
}

fn bookkeeping_for(locations: &[DocLocation]) -> Arc<Bookkeeping> {
    Arc::new(Bookkeeping::from_entries(locations.iter().map(|l| (l.doc_id(), format!("example.com/{}", l.doc_id())))))
}

async fn build(store: Arc<dyn PostingsStore>, corpus: &TempDir, locations: &[DocLocation]) -> htmlrank_core::builder::BuildReport {
    let builder = IndexBuilder::new(store, Arc::new(Tokenizer::new()), BuildConfig::new(corpus.path()));
    let report = builder.build(locations).await.unwrap();
    assert_eq!(builder.state(), BuildState::Built);
    report
}

async fn engine(store: Arc<dyn PostingsStore>, resolver: Arc<dyn UrlResolver>, config: QueryConfig) -> QueryEngine {
    QueryEngine::open(store, Arc::new(Tokenizer::new()), resolver, config).await.unwrap()
}

#[tokio::test]
async fn fox_query_finds_only_the_fox_document() {
    let (dir, locs) = write_corpus(&[
        ("0/a", "<html><head><title>fox</title></head><body><p>fox jumps</p></body></html>"),
        ("0/b", "<html><body><p>dog sleeps</p></body></html>"),
    ]);
    let store: Arc<dyn PostingsStore> = Arc::new(MemoryStore::new());
    let report = build(store.clone(), &dir, &locs).await;
    assert_eq!(report.documents_indexed, 2);

    let engine = engine(store.clone(), bookkeeping_for(&locs), QueryConfig::default()).await;
    let ranked = engine.rank("fox").await.unwrap();
    assert_eq!(ranked.len(), 1);
    assert_eq!(ranked[0].doc_id, "0/a");
    assert!(ranked[0].score > 0.0);

    let urls = engine.query("fox").await.unwrap();
    assert_eq!(urls, vec!["http://example.com/0/a".to_string()]);

    let fox = store.get_term_row("fox").await.unwrap().unwrap();
    let tf_idf = fox.postings[0].tf_idf.unwrap();
    assert!((tf_idf - fox.postings[0].tf * 2f64.ln()).abs() < 1e-12);
}

#[tokio::test]
async fn document_frequency_matches_postings_length() {
    let (dir, locs) = write_corpus(&[
        ("0/0", "<p>shared alpha</p>"),
        ("0/1", "<p>shared beta</p>"),
        ("1/0", "<p>shared gamma</p>"),
    ]);
    let store: Arc<dyn PostingsStore> = Arc::new(MemoryStore::new());
    build(store.clone(), &dir, &locs).await;

    assert_eq!(store.distinct_document_count().await.unwrap(), 3);
    let shared = store.get_term_row("share").await.unwrap().unwrap();
    assert_eq!(shared.document_frequency(), 3);
    let docs: HashSet<&str> = shared.postings.iter().map(|p| p.location.as_str()).collect();
    assert_eq!(docs.len(), 3);
    // idf = ln(3/3) = 0
    assert!(shared.postings.iter().all(|p| p.tf_idf == Some(0.0)));
    let alpha = store.get_term_row("alpha").await.unwrap().unwrap();
    assert_eq!(alpha.document_frequency(), 1);
}

#[tokio::test]
async fn second_build_is_a_no_op() {
    let (dir, locs) = write_corpus(&[("0/0", "<p>hello world</p>"), ("0/1", "<p>goodbye world</p>")]);
    let store: Arc<dyn PostingsStore> = Arc::new(MemoryStore::new());
    let first = build(store.clone(), &dir, &locs).await;
    assert!(!first.already_built);
    let count = store.count().await.unwrap();

    let second = build(store.clone(), &dir, &locs).await;
    assert!(second.already_built);
    assert_eq!(second.documents_indexed, 0);
    assert_eq!(store.count().await.unwrap(), count);
    assert_eq!(store.get_term_row("world").await.unwrap().unwrap().document_frequency(), 2);
}

#[tokio::test]
async fn repeated_queries_return_identical_rankings() {
    let (dir, locs) = write_corpus(&[
        ("0/0", "<title>rust compiler</title><p>borrow checker</p>"),
        ("0/1", "<p>rust belt steel</p>"),
        ("0/2", "<h1>compiler design</h1>"),
        ("0/3", "<p>garden tools</p>"),
    ]);
    let store: Arc<dyn PostingsStore> = Arc::new(MemoryStore::new());
    build(store.clone(), &dir, &locs).await;
    let engine = engine(store, bookkeeping_for(&locs), QueryConfig::default()).await;

    let first = engine.rank("rust compiler design").await.unwrap();
    assert!(!first.is_empty());
    for _ in 0..5 {
        assert_eq!(engine.rank("rust compiler design").await.unwrap(), first);
    }
}

#[tokio::test]
async fn stop_word_query_matches_nothing() {
    let (dir, locs) = write_corpus(&[("0/0", "<p>the fox and the hound</p>"), ("0/1", "<p>a cat</p>")]);
    let store: Arc<dyn PostingsStore> = Arc::new(MemoryStore::new());
    build(store.clone(), &dir, &locs).await;
    let engine = engine(store, bookkeeping_for(&locs), QueryConfig::default()).await;

    assert_eq!(engine.query_lemmas("the a an").len(), 3);
    assert!(engine.rank("the a an").await.unwrap().is_empty());
    assert!(engine.query("").await.unwrap().is_empty());
}

#[tokio::test]
async fn results_are_capped_at_twenty() {
    let mut pages = Vec::new();
    for i in 0..25 {
        let filler: Vec<String> = (0..i).map(|j| format!("filler{j}x")).collect();
        pages.push((format!("0/{i}"), format!("<p>fox {}</p>", filler.join(" "))));
    }
    pages.push(("1/0".to_string(), "<p>unrelated page</p>".to_string()));
    let docs: Vec<(&str, &str)> = pages.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
    let (dir, locs) = write_corpus(&docs);
    let store: Arc<dyn PostingsStore> = Arc::new(MemoryStore::new());
    build(store.clone(), &dir, &locs).await;
    let engine = engine(store, bookkeeping_for(&locs), QueryConfig::default()).await;

    let ranked = engine.rank("fox").await.unwrap();
    assert_eq!(ranked.len(), 20);
    assert!(ranked.windows(2).all(|w| w[0].score >= w[1].score));
    // fewest distinct lemmas means the highest tf
    assert_eq!(ranked[0].doc_id, "0/0");
    assert_eq!(engine.query("fox").await.unwrap().len(), 20);
}

/// Wraps a memory store and rejects writes for chosen documents or terms.
struct FailingStore {
    inner: MemoryStore,
    fail: HashSet<String>,
    fail_terms: HashSet<String>,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FailingStore {
    fn new(fail: &[&str]) -> Self {
        Self {
            inner: MemoryStore::new(),
            fail: fail.iter().map(|s| s.to_string()).collect(),
            fail_terms: HashSet::new(),
            delay: None,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl PostingsStore for FailingStore {
    async fn count(&self) -> Result<usize> { self.inner.count().await }

    async fn batch_upsert_postings(&self, location: &str, postings: Vec<(String, Posting)>) -> Result<()> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if self.fail.contains(location) {
            return Err(Error::write_failure(location, "simulated bulk write error"));
        }
        self.inner.batch_upsert_postings(location, postings).await
    }

    async fn get_term_row(&self, lemma: &str) -> Result<Option<TermRow>> { self.inner.get_term_row(lemma).await }

    async fn distinct_document_count(&self) -> Result<usize> { self.inner.distinct_document_count().await }

    fn iterate_all_terms(&self) -> TermIter<'_> { self.inner.iterate_all_terms() }

    async fn batch_set_tfidf(&self, updates: Vec<TfIdfUpdate>) -> Result<()> {
        if let Some(update) = updates.iter().find(|u| self.fail_terms.contains(&u.lemma)) {
            return Err(Error::write_failure(update.lemma.clone(), "simulated update error"));
        }
        self.inner.batch_set_tfidf(updates).await
    }

    fn size_on_disk(&self) -> Result<u64> { self.inner.size_on_disk() }

    async fn clear(&self) -> Result<()> { self.inner.clear().await }
}

#[tokio::test]
async fn failed_write_drops_only_that_document() {
    let (dir, locs) = write_corpus(&[
        ("0/0", "<p>alpha common</p>"),
        ("0/1", "<p>beta common</p>"),
        ("0/2", "<p>gamma common</p>"),
        ("0/3", "<p>delta common</p>"),
        ("0/4", "<p>epsilon common</p>"),
    ]);
    let store = Arc::new(FailingStore::new(&["0/2"]));
    let report = build(store.clone(), &dir, &locs).await;

    assert_eq!(report.documents_indexed, 4);
    assert_eq!(report.write_failures, 1);
    assert_eq!(report.backfill.total_documents, 4);
    assert!(store.get_term_row("gamma").await.unwrap().is_none());
    let common = store.get_term_row("common").await.unwrap().unwrap();
    assert_eq!(common.document_frequency(), 4);
    assert!(common.postings.iter().all(|p| p.location != "0/2"));
}

#[tokio::test]
async fn failed_term_backfill_does_not_stop_the_pass() {
    let (dir, locs) = write_corpus(&[
        ("0/0", "<p>alpha gamma</p>"),
        ("0/1", "<p>beta</p>"),
        ("0/2", "<p>delta</p>"),
    ]);
    let mut failing = FailingStore::new(&[]);
    failing.fail_terms.insert("gamma".to_string());
    let store = Arc::new(failing);
    let report = build(store.clone(), &dir, &locs).await;

    assert_eq!(report.documents_indexed, 3);
    assert_eq!(report.backfill.terms_failed, 1);
    assert_eq!(report.backfill.terms_updated, 3);
    for lemma in ["alpha", "beta", "delta"] {
        let row = store.get_term_row(lemma).await.unwrap().unwrap();
        assert!(row.postings.iter().all(|p| p.tf_idf.is_some()), "{lemma} was not backfilled");
    }
    let gamma = store.get_term_row("gamma").await.unwrap().unwrap();
    assert_eq!(gamma.postings[0].tf_idf, None);

    // gamma is scored through tf / idf: query weight ln3 times tf / ln3
    let engine = engine(store, bookkeeping_for(&locs), QueryConfig::default()).await;
    let ranked = engine.rank("gamma").await.unwrap();
    assert_eq!(ranked.len(), 1);
    assert_eq!(ranked[0].doc_id, "0/0");
    let posting = &gamma.postings[0];
    let expected = posting.tf + posting.html_weight / 10_000.0;
    assert!((ranked[0].score - expected).abs() < 1e-9, "score {} expected {expected}", ranked[0].score);
}

#[tokio::test]
async fn equal_scores_order_by_document_id() {
    let (dir, locs) = write_corpus(&[
        ("0/b", "<p>twin page</p>"),
        ("0/a", "<p>twin page</p>"),
        ("0/c", "<p>other text</p>"),
    ]);
    let store: Arc<dyn PostingsStore> = Arc::new(MemoryStore::new());
    build(store.clone(), &dir, &locs).await;
    let engine = engine(store, bookkeeping_for(&locs), QueryConfig::default()).await;

    let ranked = engine.rank("twin").await.unwrap();
    assert_eq!(ranked.len(), 2);
    assert_eq!(ranked[0].score, ranked[1].score);
    assert_eq!(ranked[0].doc_id, "0/a");
    assert_eq!(ranked[1].doc_id, "0/b");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn build_runs_on_a_spawned_task() {
    let (dir, locs) = write_corpus(&[("0/0", "<p>spawned build</p>"), ("0/1", "<p>another build</p>")]);
    let store = Arc::new(SledStore::temporary().unwrap());
    let builder = Arc::new(IndexBuilder::new(store.clone(), Arc::new(Tokenizer::new()), BuildConfig::new(dir.path())));

    let task = {
        let builder = builder.clone();
        tokio::spawn(async move { builder.build(&locs).await })
    };
    let report = task.await.unwrap().unwrap();
    assert_eq!(report.documents_indexed, 2);
    assert_eq!(builder.state(), BuildState::Built);
    let row = store.get_term_row("build").await.unwrap().unwrap();
    assert_eq!(row.document_frequency(), 2);
    assert!(row.postings.iter().all(|p| p.tf_idf == Some(0.0)));
}

#[tokio::test]
async fn slow_writes_time_out_and_concurrency_stays_bounded() {
    let pages: Vec<(String, String)> = (0..8).map(|i| (format!("0/{i}"), "<p>steady page</p>".to_string())).collect();
    let docs: Vec<(&str, &str)> = pages.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
    let (dir, locs) = write_corpus(&docs);

    let mut slow = FailingStore::new(&[]);
    slow.delay = Some(Duration::from_millis(30));
    let store = Arc::new(slow);
    let builder = IndexBuilder::new(store.clone(), Arc::new(Tokenizer::new()), BuildConfig::new(dir.path()));
    let report = builder.build(&locs).await.unwrap();
    assert_eq!(report.documents_indexed, 8);
    let peak = store.max_in_flight.load(Ordering::SeqCst);
    assert!(peak >= 1 && peak <= 3, "peak in-flight writes was {peak}");

    let mut slower = FailingStore::new(&[]);
    slower.delay = Some(Duration::from_millis(200));
    let store = Arc::new(slower);
    let mut config = BuildConfig::new(dir.path());
    config.write_timeout = Duration::from_millis(20);
    let builder = IndexBuilder::new(store.clone(), Arc::new(Tokenizer::new()), config);
    let report = builder.build(&locs[..2]).await.unwrap();
    assert_eq!(report.documents_indexed, 0);
    assert_eq!(report.write_timeouts, 2);
    assert_eq!(store.count().await.unwrap(), 0);
}

#[tokio::test]
async fn unreadable_documents_are_skipped() {
    let (dir, mut locs) = write_corpus(&[("0/0", "<p>valid page</p>"), ("0/empty", "<p>the a an</p>")]);
    fs::write(dir.path().join("0/bad"), [0x3c, 0x70, 0x3e, 0xff, 0xfe]).unwrap();
    locs.push(DocLocation::new("0", "bad"));
    locs.push(DocLocation::new("0", "missing"));

    let store: Arc<dyn PostingsStore> = Arc::new(MemoryStore::new());
    let report = build(store.clone(), &dir, &locs).await;
    assert_eq!(report.documents_indexed, 1);
    assert_eq!(report.documents_empty, 1);
    assert_eq!(report.parse_failures, 2);
    assert_eq!(store.distinct_document_count().await.unwrap(), 1);
}

#[tokio::test]
async fn missing_backfill_falls_back_to_tf_over_idf() {
    let store: Arc<dyn PostingsStore> = Arc::new(MemoryStore::new());
    store.batch_upsert_postings("0/0", vec![("fox".into(), Posting::new("0/0".into(), 0.5, 0.1))]).await.unwrap();
    store.batch_upsert_postings("0/1", vec![("dog".into(), Posting::new("0/1".into(), 1.0, 0.1))]).await.unwrap();
    let engine = engine(store, Arc::new(Bookkeeping::default()), QueryConfig::default()).await;

    let ranked = engine.rank("fox").await.unwrap();
    assert_eq!(ranked.len(), 1);
    // query weight ln2 times posting tf / ln2, plus the html boost
    assert!((ranked[0].score - (0.5 + 0.1 / 10_000.0)).abs() < 1e-9);
    // no bookkeeping entry, so the url is omitted
    assert!(engine.query("fox").await.unwrap().is_empty());
}

#[tokio::test]
async fn normalized_scoring_is_bounded_by_one() {
    let (dir, locs) = write_corpus(&[
        ("0/0", "<p>fox fox fox hound</p>"),
        ("0/1", "<p>fox lorem ipsum dolor</p>"),
        ("0/2", "<p>cat</p>"),
    ]);
    let store: Arc<dyn PostingsStore> = Arc::new(MemoryStore::new());
    build(store.clone(), &dir, &locs).await;
    let config = QueryConfig { normalize: true, ..Default::default() };
    let engine = engine(store, bookkeeping_for(&locs), config).await;

    let ranked = engine.rank("fox hound").await.unwrap();
    assert_eq!(ranked.len(), 2);
    for doc in &ranked {
        assert!(doc.score <= 1.0 + 1e-3, "{} scored {}", doc.doc_id, doc.score);
    }
}

#[tokio::test]
async fn symmetric_query_filtering_is_configurable() {
    let (dir, locs) = write_corpus(&[("0/0", "<p>ocean waves</p>")]);
    let store: Arc<dyn PostingsStore> = Arc::new(MemoryStore::new());
    build(store.clone(), &dir, &locs).await;
    let config = QueryConfig { filter_query_terms: true, ..Default::default() };
    let engine = engine(store, bookkeeping_for(&locs), config).await;
    let lemmas = engine.query_lemmas("the ocean of waves");
    assert_eq!(lemmas.keys().map(String::as_str).collect::<Vec<_>>(), vec!["ocean", "wave"]);
}

#[tokio::test]
async fn sled_build_feeds_analytics() {
    let (dir, locs) = write_corpus(&[
        ("0/0", "<title>Informatics</title><p>Donald Bren School of Information</p>"),
        ("0/1", "<h1>Mondego</h1><p>code search research group</p>"),
        ("0/2", "<p>Irvine California</p>"),
    ]);
    let store = Arc::new(SledStore::temporary().unwrap());
    let report = build(store.clone(), &dir, &locs).await;
    let engine = engine(store.clone(), bookkeeping_for(&locs), QueryConfig::default()).await;

    let analytics = AnalyticsReport::generate(&engine, store.as_ref(), report.documents_indexed, &SAMPLE_QUERIES).await.unwrap();
    assert_eq!(analytics.documents_indexed, 3);
    assert_eq!(analytics.distinct_terms, store.count().await.unwrap());
    assert_eq!(analytics.queries.len(), 3);
    assert_eq!(analytics.queries[0].urls, vec!["http://example.com/0/0".to_string()]);
    assert_eq!(analytics.queries[1].urls, vec!["http://example.com/0/1".to_string()]);

    let out = dir.path().join("analytics.txt");
    analytics.write_to(&out).unwrap();
    let text = fs::read_to_string(out).unwrap();
    assert!(text.contains("Total number of documents: 3"));
    assert!(text.contains("Query: mondego"));
}
