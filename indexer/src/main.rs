use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use htmlrank_core::analytics::{AnalyticsReport, SAMPLE_QUERIES};
use htmlrank_core::builder::{BuildConfig, IndexBuilder};
use htmlrank_core::manifest::Bookkeeping;
use htmlrank_core::persist::{load_meta, save_meta, IndexPaths, MetaFile, SledStore, FORMAT_VERSION};
use htmlrank_core::query::{QueryConfig, QueryEngine};
use htmlrank_core::store::PostingsStore;
use htmlrank_core::tokenizer::Tokenizer;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "indexer")]
#[command(about = "Build and query an HTML TF-IDF index", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct IndexArgs {
    /// Corpus root holding <folder>/<file> documents
    #[arg(long)]
    corpus: PathBuf,
    /// Bookkeeping JSON mapping "folder/file" to url (defaults to <corpus>/bookkeeping.json)
    #[arg(long)]
    bookkeeping: Option<PathBuf>,
    /// Index directory
    #[arg(long, default_value = "./index")]
    index: PathBuf,
    /// Stop word file, one word per line (built-in English list otherwise)
    #[arg(long)]
    stopwords: Option<PathBuf>,
}

impl IndexArgs {
    fn bookkeeping(&self) -> Result<Bookkeeping> {
        let path = self.bookkeeping.clone().unwrap_or_else(|| self.corpus.join("bookkeeping.json"));
        Ok(Bookkeeping::load(path)?)
    }

    fn tokenizer(&self) -> Result<Arc<Tokenizer>> {
        let tokenizer = match &self.stopwords {
            Some(path) => Tokenizer::from_stopword_file(path)?,
            None => Tokenizer::new(),
        };
        Ok(Arc::new(tokenizer))
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Build the index unless it already exists
    Build {
        #[command(flatten)]
        index: IndexArgs,
        /// Documents processed concurrently
        #[arg(long, default_value_t = 3)]
        concurrency: usize,
        /// Timeout for each document's batched write
        #[arg(long, default_value_t = 20)]
        write_timeout_secs: u64,
        /// Drop the existing index before building
        #[arg(long, default_value_t = false)]
        rebuild: bool,
        /// Analytics report path (defaults to <index>/analytics.txt)
        #[arg(long)]
        analytics: Option<PathBuf>,
    },
    /// Print the ranked urls for a query
    Query {
        #[command(flatten)]
        index: IndexArgs,
        /// Divide scores by both vector norms
        #[arg(long, default_value_t = false)]
        normalize: bool,
        /// Drop stop words and short tokens from the query as well
        #[arg(long, default_value_t = false)]
        filter_query_terms: bool,
        query: String,
    },
    /// Regenerate the analytics report for an existing index
    Analytics {
        #[command(flatten)]
        index: IndexArgs,
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Build { index, concurrency, write_timeout_secs, rebuild, analytics } => {
            build_index(&index, concurrency, write_timeout_secs, rebuild, analytics).await
        }
        Commands::Query { index, normalize, filter_query_terms, query } => {
            let config = QueryConfig { normalize, filter_query_terms, ..Default::default() };
            let store: Arc<dyn PostingsStore> = Arc::new(SledStore::open(&IndexPaths::new(&index.index))?);
            let engine = QueryEngine::open(store, index.tokenizer()?, Arc::new(index.bookkeeping()?), config).await?;
            for url in engine.query(&query).await? {
                println!("{url}");
            }
            Ok(())
        }
        Commands::Analytics { index, output } => {
            let paths = IndexPaths::new(&index.index);
            let meta = load_meta(&paths)?;
            let store = Arc::new(SledStore::open(&paths)?);
            let output = output.unwrap_or_else(|| paths.analytics());
            write_analytics(&index, store, meta.documents_indexed, output).await
        }
    }
}

async fn build_index(args: &IndexArgs, concurrency: usize, write_timeout_secs: u64, rebuild: bool, analytics: Option<PathBuf>) -> Result<()> {
    // bookkeeping and store problems abort before any document is touched
    let bookkeeping = args.bookkeeping()?;
    let manifest = bookkeeping.resolve_manifest()?;
    let paths = IndexPaths::new(&args.index);
    let store = Arc::new(SledStore::open(&paths)?);
    if rebuild {
        tracing::info!(index = %paths.root.display(), "dropping existing index");
        store.clear().await?;
    }

    let config = BuildConfig { concurrency, write_timeout: Duration::from_secs(write_timeout_secs), ..BuildConfig::new(&args.corpus) };
    let builder = IndexBuilder::new(store.clone(), args.tokenizer()?, config);
    let report = builder.build(&manifest).await?;
    if report.already_built {
        tracing::info!("index already built; pass --rebuild to start over");
        return Ok(());
    }

    let meta = MetaFile {
        documents_indexed: report.documents_indexed,
        documents_skipped: report.documents_skipped(),
        terms: store.count().await?,
        created_at: time::OffsetDateTime::now_utc().format(&time::format_description::well_known::Rfc3339).unwrap_or_else(|_| "".into()),
        version: FORMAT_VERSION,
    };
    save_meta(&paths, &meta)?;

    let output = analytics.unwrap_or_else(|| paths.analytics());
    write_analytics(args, store, report.documents_indexed, output).await?;
    tracing::info!(index = %paths.root.display(), "index build complete");
    Ok(())
}

async fn write_analytics(args: &IndexArgs, store: Arc<SledStore>, documents_indexed: usize, output: PathBuf) -> Result<()> {
    let engine = QueryEngine::open(store.clone(), args.tokenizer()?, Arc::new(args.bookkeeping()?), QueryConfig::default()).await?;
    let report = AnalyticsReport::generate(&engine, store.as_ref(), documents_indexed, &SAMPLE_QUERIES).await?;
    report.write_to(&output)?;
    tracing::info!(output = %output.display(), "analytics written");
    Ok(())
}
