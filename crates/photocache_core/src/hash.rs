use std::fmt::Write;

use sha2::{Digest, Sha256};

use crate::SummaryFields;

/// Incremental SHA-256 over an entity's textual fields and sub-item bytes.
///
/// Every field is length-prefixed so that adjacent values cannot run
/// together into the same digest.
#[derive(Default)]
pub struct ContentHasher {
    inner: Sha256,
}

impl ContentHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn summary(&mut self, summary: &SummaryFields) -> &mut Self {
        self.text(Some(&summary.title))
            .text(Some(&summary.subtitle))
            .text(Some(&summary.description))
    }

    pub fn text(&mut self, value: Option<&str>) -> &mut Self {
        match value {
            Some(value) => {
                self.inner.update([1u8]);
                self.bytes(value.as_bytes())
            }
            None => {
                self.inner.update([0u8]);
                self
            }
        }
    }

    pub fn bytes(&mut self, data: &[u8]) -> &mut Self {
        self.inner.update((data.len() as u64).to_le_bytes());
        self.inner.update(data);
        self
    }

    pub fn finish(self) -> String {
        let digest = self.inner.finalize();
        let mut hex = String::with_capacity(digest.len() * 2);
        for byte in digest.iter() {
            let _ = write!(&mut hex, "{byte:02x}");
        }
        hex
    }
}
