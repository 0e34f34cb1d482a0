#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **pii-attachment-processor** – Dispatches a downloaded attachment to the
//! first registered [`ExtractionStrategy`] that claims to support it, then
//! gates the extracted text on quality before handing it to detection.
//!
//! Extraction strategies (PDF, Office documents, plain text, ...) are
//! registered once at construction; there is no dynamic loading.

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use pii_content_accessor::AttachmentInfo;

/// Errors raised while extracting text from an attachment.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// The strategy recognized the format but could not parse this file.
    #[error("failed to extract text from {name}: {reason}")]
    Malformed {
        /// Attachment name, for diagnostics.
        name: String,
        /// Human-readable failure reason.
        reason: String,
    },
}

/// One format-specific text extraction strategy. The actual parsing logic
/// for any given format (PDF, DOCX, ...) is an external collaborator;
/// this crate only owns dispatch and quality gating.
#[async_trait]
pub trait ExtractionStrategy: Send + Sync {
    /// Whether this strategy can handle the given attachment, typically
    /// based on content type or file extension.
    fn supports(&self, info: &AttachmentInfo) -> bool;

    /// Extract plain text from the attachment's raw bytes.
    async fn extract(&self, info: &AttachmentInfo, bytes: &[u8]) -> Result<String, ExtractionError>;

    /// Strategy name, for logging.
    fn name(&self) -> &'static str;
}

/// Content types this crate can decode without an external parser.
const PLAIN_TEXT_CONTENT_TYPES: &[&str] = &["text/plain", "text/markdown", "text/csv"];

/// Built-in passthrough strategy for plain-text attachments. Decodes the raw
/// bytes as UTF-8, lossily replacing invalid sequences, and returns them
/// unmodified. Formats that need real parsing (PDF, Office documents, ...)
/// are external collaborators this crate does not ship a parser for.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextExtractionStrategy;

#[async_trait]
impl ExtractionStrategy for PlainTextExtractionStrategy {
    fn supports(&self, info: &AttachmentInfo) -> bool {
        PLAIN_TEXT_CONTENT_TYPES.contains(&info.content_type.as_str())
    }

    async fn extract(
        &self,
        _info: &AttachmentInfo,
        bytes: &[u8],
    ) -> Result<String, ExtractionError> {
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }

    fn name(&self) -> &'static str {
        "plain-text"
    }
}

/// Minimum-quality thresholds an extracted text must clear before it is
/// considered worth running through detection. All ratios are computed
/// over the extracted text's characters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextQualityThresholds {
    /// Minimum character count.
    pub min_length: usize,
    /// Minimum fraction of alphanumeric characters.
    pub min_alphanumeric_ratio: f32,
    /// Maximum fraction of whitespace characters.
    pub max_space_ratio: f32,
    /// Minimum fraction of printable characters.
    pub min_printable_ratio: f32,
    /// Maximum fraction of non-alphanumeric, non-space "special" characters.
    pub max_special_char_ratio: f32,
}

impl Default for TextQualityThresholds {
    fn default() -> Self {
        Self {
            min_length: 20,
            min_alphanumeric_ratio: 0.3,
            max_space_ratio: 0.6,
            min_printable_ratio: 0.9,
            max_special_char_ratio: 0.3,
        }
    }
}

impl TextQualityThresholds {
    /// Whether `text` clears every configured threshold.
    pub fn passes(&self, text: &str) -> bool {
        let len = text.chars().count();
        if len < self.min_length {
            return false;
        }

        let alphanumeric = text.chars().filter(|c| c.is_alphanumeric()).count();
        let space = text.chars().filter(|c| c.is_whitespace()).count();
        let printable = text
            .chars()
            .filter(|c| !c.is_control() || c.is_whitespace())
            .count();
        let special = len - alphanumeric - space;

        let ratio = |n: usize| n as f32 / len as f32;

        ratio(alphanumeric) >= self.min_alphanumeric_ratio
            && ratio(space) <= self.max_space_ratio
            && ratio(printable) >= self.min_printable_ratio
            && ratio(special) <= self.max_special_char_ratio
    }
}

/// Registry of extraction strategies plus the quality gate applied to
/// their output.
pub struct AttachmentProcessor {
    strategies: Vec<Box<dyn ExtractionStrategy>>,
    thresholds: TextQualityThresholds,
}

impl AttachmentProcessor {
    /// Build a processor from an ordered list of strategies (first match
    /// wins) and the quality thresholds to apply to their output.
    pub fn new(strategies: Vec<Box<dyn ExtractionStrategy>>, thresholds: TextQualityThresholds) -> Self {
        Self {
            strategies,
            thresholds,
        }
    }

    /// Process an attachment: dispatch to the first supporting strategy,
    /// then gate the result on text quality. Returns `None` when no
    /// strategy supports the attachment or the extracted text fails the
    /// quality gate.
    pub async fn process(
        &self,
        info: &AttachmentInfo,
        bytes: &[u8],
    ) -> Result<Option<String>, ExtractionError> {
        let Some(strategy) = self.strategies.iter().find(|s| s.supports(info)) else {
            debug!(attachment = %info.name, "no extraction strategy supports this attachment");
            return Ok(None);
        };

        let text = strategy.extract(info, bytes).await?;
        if self.thresholds.passes(&text) {
            Ok(Some(text))
        } else {
            debug!(attachment = %info.name, strategy = strategy.name(), "extracted text failed quality gate");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pii_types::{AttachmentName, PageId};

    fn info(name: &str) -> AttachmentInfo {
        AttachmentInfo {
            name: AttachmentName::new(name).unwrap(),
            page_id: PageId::new("1").unwrap(),
            content_type: "text/plain".to_string(),
        }
    }

    struct PlainTextStrategy;

    #[async_trait]
    impl ExtractionStrategy for PlainTextStrategy {
        fn supports(&self, info: &AttachmentInfo) -> bool {
            info.content_type == "text/plain"
        }

        async fn extract(&self, _info: &AttachmentInfo, bytes: &[u8]) -> Result<String, ExtractionError> {
            Ok(String::from_utf8_lossy(bytes).to_string())
        }

        fn name(&self) -> &'static str {
            "plain-text"
        }
    }

    struct NeverSupports;

    #[async_trait]
    impl ExtractionStrategy for NeverSupports {
        fn supports(&self, _info: &AttachmentInfo) -> bool {
            false
        }

        async fn extract(&self, info: &AttachmentInfo, _bytes: &[u8]) -> Result<String, ExtractionError> {
            Err(ExtractionError::Malformed {
                name: info.name.to_string(),
                reason: "should never be called".to_string(),
            })
        }

        fn name(&self) -> &'static str {
            "never"
        }
    }

    #[tokio::test]
    async fn dispatches_to_first_supporting_strategy() {
        let processor = AttachmentProcessor::new(
            vec![Box::new(NeverSupports), Box::new(PlainTextStrategy)],
            TextQualityThresholds::default(),
        );
        let text = b"This is a reasonably long piece of extracted text content.";
        let result = processor.process(&info("notes.txt"), text).await.unwrap();
        assert_eq!(result.as_deref(), Some(std::str::from_utf8(text).unwrap()));
    }

    #[tokio::test]
    async fn no_supporting_strategy_yields_none() {
        let processor = AttachmentProcessor::new(vec![Box::new(NeverSupports)], TextQualityThresholds::default());
        let result = processor.process(&info("notes.txt"), b"anything").await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn low_quality_text_is_gated_out() {
        let processor = AttachmentProcessor::new(vec![Box::new(PlainTextStrategy)], TextQualityThresholds::default());
        let result = processor.process(&info("notes.txt"), b"..").await.unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn quality_thresholds_reject_mostly_whitespace() {
        let thresholds = TextQualityThresholds::default();
        let padded = format!("{}{}", "a".repeat(5), " ".repeat(50));
        assert!(!thresholds.passes(&padded));
    }

    #[test]
    fn quality_thresholds_accept_ordinary_prose() {
        let thresholds = TextQualityThresholds::default();
        assert!(thresholds.passes("The quarterly report contains several action items for the team."));
    }
}
