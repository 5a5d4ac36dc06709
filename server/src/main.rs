use anyhow::Result;
use axum::Router;
use clap::Parser;
use htmlrank_core::manifest::Bookkeeping;
use htmlrank_core::persist::{IndexPaths, SledStore};
use htmlrank_core::query::QueryEngine;
use htmlrank_core::tokenizer::Tokenizer;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};
use server::{build_app, ServerArgs};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = ServerArgs::parse();

    let store = Arc::new(SledStore::open(&IndexPaths::new(&args.index))?);
    let tokenizer = match &args.stopwords {
        Some(path) => Tokenizer::from_stopword_file(path)?,
        None => Tokenizer::new(),
    };
    let resolver = Arc::new(Bookkeeping::load(&args.bookkeeping)?);
    let engine = QueryEngine::open(store, Arc::new(tokenizer), resolver, args.query_config()).await?;
    tracing::info!(documents = engine.total_documents(), "index opened");
    let app: Router = build_app(Arc::new(engine));

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
