use std::path::Path;

use photocache_core::{PageParser, ParseError, ParsedPage, SummaryFields};
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// CSS selectors locating each field on a cached page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserSelectors {
    /// Element whose text holds the number of paged pages.
    pub page_count: String,
    pub sub_item: String,
    /// Attribute of the `sub_item` element holding the resource url.
    pub sub_item_attr: String,
    pub author: String,
    pub label: String,
    pub title: String,
    pub subtitle: String,
    pub description: String,
}

impl Default for ParserSelectors {
    fn default() -> Self {
        Self {
            page_count: ".photo-count".to_string(),
            sub_item: "img.photo".to_string(),
            sub_item_attr: "src".to_string(),
            author: ".photo-author".to_string(),
            label: ".photo-label".to_string(),
            title: "h1".to_string(),
            subtitle: "h2".to_string(),
            description: ".description".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid selector for {field}: {message}")]
pub struct SelectorError {
    pub field: &'static str,
    pub message: String,
}

/// [`PageParser`] driven by CSS selectors.
#[derive(Debug)]
pub struct SelectorPageParser {
    page_count: Selector,
    sub_item: Selector,
    sub_item_attr: String,
    author: Selector,
    label: Selector,
    title: Selector,
    subtitle: Selector,
    description: Selector,
    base_url: Option<Url>,
}

impl SelectorPageParser {
    /// Compiles the selectors. Relative sub-item urls are resolved against
    /// `base_url` when one is given and kept verbatim otherwise.
    pub fn new(selectors: &ParserSelectors, base_url: Option<Url>) -> Result<Self, SelectorError> {
        Ok(Self {
            page_count: compile("page_count", &selectors.page_count)?,
            sub_item: compile("sub_item", &selectors.sub_item)?,
            sub_item_attr: selectors.sub_item_attr.clone(),
            author: compile("author", &selectors.author)?,
            label: compile("label", &selectors.label)?,
            title: compile("title", &selectors.title)?,
            subtitle: compile("subtitle", &selectors.subtitle)?,
            description: compile("description", &selectors.description)?,
            base_url,
        })
    }

    pub fn parse_page_html(&self, html: &str) -> Result<ParsedPage, ParseError> {
        let doc = Html::parse_document(html);
        let expected_page_count = match first_text(&doc, &self.page_count) {
            Some(text) => Some(parse_count(&text)?),
            None => None,
        };
        let sub_item_url = doc
            .select(&self.sub_item)
            .next()
            .and_then(|el| el.value().attr(&self.sub_item_attr))
            .map(|raw| self.resolve(raw.trim()));

        Ok(ParsedPage {
            sub_item_url,
            author: first_text(&doc, &self.author),
            label: first_text(&doc, &self.label),
            expected_page_count,
        })
    }

    pub fn parse_summary_html(&self, html: &str) -> Result<SummaryFields, ParseError> {
        let doc = Html::parse_document(html);
        let title = first_text(&doc, &self.title).ok_or(ParseError::MissingField("title"))?;
        Ok(SummaryFields {
            title,
            subtitle: first_text(&doc, &self.subtitle).unwrap_or_default(),
            description: first_text(&doc, &self.description).unwrap_or_default(),
        })
    }

    fn resolve(&self, raw: &str) -> String {
        match &self.base_url {
            Some(base) => base
                .join(raw)
                .map(String::from)
                .unwrap_or_else(|_| raw.to_string()),
            None => raw.to_string(),
        }
    }
}

impl PageParser for SelectorPageParser {
    fn parse_page(&self, local_file: &Path) -> Result<ParsedPage, ParseError> {
        let bytes = std::fs::read(local_file)?;
        self.parse_page_html(&String::from_utf8_lossy(&bytes))
    }

    fn parse_summary(&self, local_file: &Path) -> Result<SummaryFields, ParseError> {
        let bytes = std::fs::read(local_file)?;
        self.parse_summary_html(&String::from_utf8_lossy(&bytes))
    }
}

fn compile(field: &'static str, selector: &str) -> Result<Selector, SelectorError> {
    Selector::parse(selector).map_err(|err| SelectorError {
        field,
        message: err.to_string(),
    })
}

fn first_text(doc: &Html, selector: &Selector) -> Option<String> {
    doc.select(selector)
        .next()
        .map(element_text)
        .filter(|text| !text.is_empty())
}

/// Text content with runs of whitespace collapsed.
fn element_text(el: ElementRef<'_>) -> String {
    el.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Thousands separators accepted inside a count.
const GROUP_SEPARATORS: [char; 5] = [',', '.', '\'', '\u{a0}', '\u{202f}'];

/// First number in `text`, so "12 photos" and "(12)" both read as 12 and
/// "1,234" reads as 1234. Decimal fractions are not supported.
fn parse_count(text: &str) -> Result<u32, ParseError> {
    let digits: String = text
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit() || GROUP_SEPARATORS.contains(c))
        .filter(char::is_ascii_digit)
        .collect();
    digits.parse().map_err(|_| ParseError::InvalidValue {
        field: "page count",
        value: text.to_string(),
    })
}
