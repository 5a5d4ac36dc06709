use lazy_static::lazy_static;
use scraper::{Html, Selector};
use std::str::Utf8Error;

lazy_static! {
    static ref ANY_ELEMENT: Selector = Selector::parse("*").expect("valid selector");
}

/// Text content of one element, descendants included.
#[derive(Debug, Clone, PartialEq)]
pub struct TagText {
    pub tag_name: String,
    pub text: String,
}

/// Structural weight a lemma earns for each tag it occurs in.
pub fn tag_weight(tag_name: &str) -> f64 {
    match tag_name {
        "title" => 0.6,
        "h1" => 0.5,
        "h2" => 0.4,
        "h3" => 0.3,
        "h4" => 0.2,
        _ => 0.1,
    }
}

/// Every element of the document in tree order, nested ones included.
///
/// Text nodes are joined with a space so adjacent tags never fuse into one token.
pub fn parse_tags(raw: &[u8]) -> Result<Vec<TagText>, Utf8Error> {
    let source = std::str::from_utf8(raw)?;
    let doc = Html::parse_document(source);
    let tags = doc
        .select(&ANY_ELEMENT)
        .map(|el| TagText {
            tag_name: el.value().name().to_string(),
            text: el.text().collect::<Vec<_>>().join(" "),
        })
        .collect();
    Ok(tags)
}
