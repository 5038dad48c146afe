use serde::{Deserialize, Serialize};

/// Builds the remote urls an entity's pipeline fetches.
pub trait UrlScheme: Send + Sync {
    fn first_page_url(&self, remote_id: &str) -> String;
    /// `index` runs from 1 to the expected page count.
    fn page_url(&self, remote_id: &str, index: u32) -> String;
    fn summary_url(&self, remote_id: &str) -> String;
}

/// Url templates with `{id}` and `{page}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateUrls {
    pub first_page: String,
    pub page: String,
    pub summary: String,
}

impl TemplateUrls {
    pub fn new(
        first_page: impl Into<String>,
        page: impl Into<String>,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            first_page: first_page.into(),
            page: page.into(),
            summary: summary.into(),
        }
    }
}

impl UrlScheme for TemplateUrls {
    fn first_page_url(&self, remote_id: &str) -> String {
        fill(&self.first_page, remote_id, None)
    }

    fn page_url(&self, remote_id: &str, index: u32) -> String {
        fill(&self.page, remote_id, Some(index))
    }

    fn summary_url(&self, remote_id: &str) -> String {
        fill(&self.summary, remote_id, None)
    }
}

fn fill(template: &str, remote_id: &str, page: Option<u32>) -> String {
    let encoded_id: String = url::form_urlencoded::byte_serialize(remote_id.as_bytes()).collect();
    let filled = template.replace("{id}", &encoded_id);
    match page {
        Some(page) => filled.replace("{page}", &page.to_string()),
        None => filled,
    }
}
