use std::io;
use std::path::Path;

use thiserror::Error;

use crate::SummaryFields;

/// Fields a page parser can pull from one downloaded page. Which of them are
/// present depends on the page: the first page carries the page count, the
/// paged pages carry one sub-item each.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedPage {
    pub sub_item_url: Option<String>,
    pub author: Option<String>,
    pub label: Option<String>,
    pub expected_page_count: Option<u32>,
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("cannot read page: {0}")]
    Unreadable(#[from] io::Error),
    #[error("required field missing: {0}")]
    MissingField(&'static str),
    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
}

/// Extracts structured fields from cached pages. The cache never interprets
/// page markup itself.
pub trait PageParser: Send + Sync {
    fn parse_page(&self, local_file: &Path) -> Result<ParsedPage, ParseError>;
    fn parse_summary(&self, local_file: &Path) -> Result<SummaryFields, ParseError>;
}
