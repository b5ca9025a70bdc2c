//! PDF extraction boundary.
//!
//! Parsing the document and summarizing figures (vision model) belong to the
//! hosting process; the pipeline consumes structured text and asset
//! summaries through this trait.

use async_trait::async_trait;

use crate::utils::ApiResult;

/// Extracted content of the first pages of a paper.
#[derive(Debug, Clone, Default)]
pub struct PdfContent {
    /// Page/block-tagged text of the scanned pages.
    pub full_text: String,
    /// Extracted tables rendered as text.
    pub tables: Vec<String>,
    /// One summary per clinically relevant figure.
    pub figure_summaries: Vec<String>,
}

impl PdfContent {
    /// Prompt block describing tables and figures, empty when neither exists.
    pub fn assets_summary(&self) -> String {
        let mut parts = Vec::new();
        for (idx, table) in self.tables.iter().enumerate() {
            parts.push(format!("[Table {}]\n{}", idx + 1, table));
        }
        for (idx, figure) in self.figure_summaries.iter().enumerate() {
            parts.push(format!("[Figure {}]\n{}", idx + 1, figure));
        }
        parts.join("\n\n")
    }
}

#[async_trait]
pub trait PdfExtractor: Send + Sync {
    async fn extract(&self, file_content: &[u8]) -> ApiResult<PdfContent>;
}
