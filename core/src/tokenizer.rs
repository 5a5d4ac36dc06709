use lazy_static::lazy_static;
use regex::Regex;
use rust_stemmers::{Algorithm, Stemmer};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

use crate::Result;

/// Tokens shorter than this are dropped on the indexing path.
pub const MIN_TOKEN_LEN: usize = 3;

lazy_static! {
    static ref NON_ALNUM: Regex = Regex::new(r"[^a-zA-Z0-9]+").expect("valid regex");
    static ref STOPWORDS: HashSet<&'static str> = {
        let words: &[&str] = &[
            "a","about","above","after","again","against","all","am","an","and","any","are","aren't","as","at",
            "be","because","been","before","being","below","between","both","but","by",
            "can","can't","cannot","could","couldn't",
            "did","didn't","do","does","doesn't","doing","don't","down","during",
            "each","few","for","from","further",
            "had","hadn't","has","hasn't","have","haven't","having","he","he'd","he'll","he's","her","here","here's","hers","herself","him","himself","his","how","how's",
            "i","i'd","i'll","i'm","i've","if","in","into","is","isn't","it","it's","its","itself",
            "let's","me","more","most","mustn't","my","myself",
            "no","nor","not","of","off","on","once","only","or","other","ought","our","ours","ourselves","out","over","own",
            "same","she","she'd","she'll","she's","should","shouldn't","so","some","such",
            "than","that","that's","the","their","theirs","them","themselves","then","there","there's","these","they","they'd","they'll","they're","they've","this","those","through","to","too",
            "under","until","up","very",
            "was","wasn't","we","we'd","we'll","we're","we've","were","weren't","what","what's","when","when's","where","where's","which","while","who","who's","whom","why","why's","with","won't","would","wouldn't",
            "you","you'd","you'll","you're","you've","your","yours","yourself","yourselves"
        ];
        words.iter().copied().collect()
    };
}

/// Lowercasing Snowball-English tokenizer shared by the indexing and query paths.
pub struct Tokenizer {
    stemmer: Stemmer,
    stopwords: HashSet<String>,
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self::with_stopwords(STOPWORDS.iter().copied())
    }
}

impl Tokenizer {
    pub fn new() -> Self { Self::default() }

    pub fn with_stopwords<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let stopwords = words
            .into_iter()
            .map(|w| w.as_ref().trim().to_lowercase())
            .filter(|w| !w.is_empty())
            .collect();
        Self { stemmer: Stemmer::create(Algorithm::English), stopwords }
    }

    /// One stop word per line; blank lines are ignored.
    pub fn from_stopword_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(Self::with_stopwords(text.lines()))
    }

    pub fn is_stopword(&self, token: &str) -> bool { self.stopwords.contains(token) }

    /// Replace everything outside `[a-zA-Z0-9]` with whitespace, lowercase, drop numeric tokens and stem.
    ///
    /// With `filter_stopwords_and_short` set (the indexing path) stop words and tokens shorter
    /// than [`MIN_TOKEN_LEN`] are dropped before stemming. The query path passes `false`.
    pub fn tokenize_and_stem(&self, text: &str, filter_stopwords_and_short: bool) -> Vec<String> {
        let cleaned = NON_ALNUM.replace_all(text, " ");
        let mut tokens = Vec::new();
        for raw in cleaned.split_whitespace() {
            let token = raw.to_lowercase();
            if filter_stopwords_and_short && (token.len() < MIN_TOKEN_LEN || self.is_stopword(&token)) {
                continue;
            }
            if is_numeric(&token) { continue; }
            tokens.push(self.stemmer.stem(&token).into_owned());
        }
        tokens
    }
}

fn is_numeric(token: &str) -> bool { token.chars().all(|c| c.is_ascii_digit()) }
