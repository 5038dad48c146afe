use photocache_core::TransferKind;
use sha2::{Digest, Sha256};

const HASH_HEX_LEN: usize = 16;

/// Deterministic cache file name: `{short_hash(url)}.{ext}`.
///
/// Pages are stored as `.html`. Files keep the extension of the url path when
/// it looks like one (1-5 ASCII alphanumerics), lowercased, else `.bin`.
pub fn cache_file_name(kind: TransferKind, url: &str) -> String {
    let hash = short_hash(url);
    let ext = match kind {
        TransferKind::Page => "html".to_string(),
        TransferKind::File => file_extension(url).unwrap_or_else(|| "bin".to_string()),
    };
    format!("{hash}.{ext}")
}

fn file_extension(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let last = parsed.path_segments()?.next_back()?;
    let (_, ext) = last.rsplit_once('.')?;
    let valid = (1..=5).contains(&ext.len()) && ext.chars().all(|c| c.is_ascii_alphanumeric());
    valid.then(|| ext.to_ascii_lowercase())
}

fn short_hash(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let mut hex = String::with_capacity(HASH_HEX_LEN);
    for byte in digest.iter().take(HASH_HEX_LEN / 2) {
        use std::fmt::Write;
        let _ = write!(&mut hex, "{byte:02x}");
    }
    hex
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_names_are_stable_html() {
        let a = cache_file_name(TransferKind::Page, "https://example.com/taxa/1");
        let b = cache_file_name(TransferKind::Page, "https://example.com/taxa/1");
        assert_eq!(a, b);
        assert!(a.ends_with(".html"));
        assert_eq!(a.len(), HASH_HEX_LEN + ".html".len());
    }

    #[test]
    fn different_urls_get_different_names() {
        let a = cache_file_name(TransferKind::Page, "https://example.com/taxa/1");
        let b = cache_file_name(TransferKind::Page, "https://example.com/taxa/2");
        assert_ne!(a, b);
    }

    #[test]
    fn file_extension_comes_from_url_path() {
        let name = cache_file_name(TransferKind::File, "https://img.example/a/B.JPG?size=large");
        assert!(name.ends_with(".jpg"));
    }

    #[test]
    fn odd_extensions_fall_back_to_bin() {
        for url in [
            "https://img.example/a/photo",
            "https://img.example/a/photo.verylongext",
            "https://img.example/a/photo.j-g",
            "not a url",
        ] {
            assert!(cache_file_name(TransferKind::File, url).ends_with(".bin"), "{url}");
        }
    }
}
