use axum::{extract::{Query, State}, http::StatusCode, response::Html, routing::get, Json, Router};
use clap::Parser;
use htmlrank_core::query::{QueryConfig, QueryEngine};
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer, AllowOrigin};
use tower_http::trace::TraceLayer;

/// Command-line options of the search server.
#[derive(Parser)]
#[command(name = "server")]
pub struct ServerArgs {
    /// Index directory path
    #[arg(long, default_value = "./index")]
    pub index: PathBuf,
    /// Bookkeeping JSON mapping "folder/file" to url
    #[arg(long)]
    pub bookkeeping: PathBuf,
    /// Stop word file used when the index was built
    #[arg(long)]
    pub stopwords: Option<PathBuf>,
    /// Divide scores by both vector norms
    #[arg(long, default_value_t = false)]
    pub normalize: bool,
    /// Drop stop words and short tokens from queries as well
    #[arg(long, default_value_t = false)]
    pub filter_query_terms: bool,
    /// Host to bind
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,
    /// Port to bind
    #[arg(long, default_value_t = 5000)]
    pub port: u16,
}

impl ServerArgs {
    pub fn query_config(&self) -> QueryConfig {
        QueryConfig { normalize: self.normalize, filter_query_terms: self.filter_query_terms, ..Default::default() }
    }
}

#[derive(Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub q: String,
}

#[derive(Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub took_s: f64,
    pub total: usize,
    pub results: Vec<String>,
}

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<QueryEngine>,
}

type HandlerError = (StatusCode, String);

pub fn build_app(engine: Arc<QueryEngine>) -> Router {
    // CORS: read CORS_ALLOW_ORIGIN (comma-separated) or allow Any by default
    let cors = match std::env::var("CORS_ALLOW_ORIGIN") {
        Ok(val) => {
            let origins: Vec<_> = val
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            if origins.is_empty() {
                CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
            } else {
                CorsLayer::new().allow_origin(AllowOrigin::list(origins)).allow_methods(Any).allow_headers(Any)
            }
        }
        Err(_) => CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any),
    };

    Router::new()
        .route("/", get(page_handler))
        .route("/health", get(|| async { "ok" }))
        .route("/search", get(search_handler))
        .with_state(AppState { engine })
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

fn internal(err: htmlrank_core::Error) -> HandlerError {
    tracing::error!(%err, "query failed");
    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}

pub async fn search_handler(State(state): State<AppState>, Query(params): Query<SearchParams>) -> Result<Json<SearchResponse>, HandlerError> {
    let start = std::time::Instant::now();
    let results = state.engine.query(&params.q).await.map_err(internal)?;
    let elapsed = start.elapsed();
    Ok(Json(SearchResponse { query: params.q, took_s: elapsed.as_secs_f64(), total: results.len(), results }))
}

/// Search form, followed by the result list when `q` is present.
pub async fn page_handler(State(state): State<AppState>, Query(params): Query<SearchParams>) -> Result<Html<String>, HandlerError> {
    let mut page = String::from("<!doctype html>\n<html><head><title>Search</title></head><body>\n");
    let _ = write!(
        page,
        "<form method=\"get\" action=\"/\"><input type=\"text\" name=\"q\" value=\"{}\" autofocus><button type=\"submit\">Search</button></form>\n",
        escape(&params.q)
    );
    if !params.q.trim().is_empty() {
        let urls = state.engine.query(&params.q).await.map_err(internal)?;
        let _ = write!(page, "<p>{} results for <b>{}</b></p>\n<ol>\n", urls.len(), escape(&params.q));
        for url in &urls {
            let url = escape(url);
            let _ = writeln!(page, "<li><a href=\"{url}\">{url}</a></li>");
        }
        page.push_str("</ol>\n");
    }
    page.push_str("</body></html>\n");
    Ok(Html(page))
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
