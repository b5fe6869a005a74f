//! Classifier collaborator seam.
//!
//! The relay does not implement spam heuristics; it consumes whatever
//! verdict a classifier stage produces and attaches it to the message.

use async_trait::async_trait;

use crate::error::AnnotateError;
use crate::message::SpamReport;

/// A byte-stream classifier: consumes the transaction bytes and yields
/// one verdict or one error.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, raw: &[u8]) -> Result<SpamReport, AnnotateError>;
}

/// Default classifier: attaches a neutral verdict without inspecting the
/// message. Stands in until a real classifier collaborator is wired up.
pub struct PassthroughClassifier;

#[async_trait]
impl Classifier for PassthroughClassifier {
    async fn classify(&self, _raw: &[u8]) -> Result<SpamReport, AnnotateError> {
        Ok(SpamReport::none())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn passthrough_yields_neutral_verdict() {
        let report = PassthroughClassifier.classify(b"anything").await.unwrap();
        assert_eq!(report.verdict, "none");
        assert!(report.symbols.is_empty());
    }
}
