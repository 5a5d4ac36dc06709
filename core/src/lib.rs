pub mod analytics;
pub mod builder;
pub mod error;
pub mod html;
pub mod index;
pub mod manifest;
pub mod persist;
pub mod query;
pub mod store;
pub mod tokenizer;

pub use error::{Error, Result};
pub use index::{idf, DocId, DocLocation, LemmaStats, Posting, TermRow, TfIdfUpdate};
