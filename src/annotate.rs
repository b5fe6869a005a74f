//! Annotation joiner — combines the classifier and parser stages of one
//! SMTP transaction into a single delivery event.
//!
//! The byte stream is chained classifier-first, parser-second, so the
//! spam verdict is available by the time the parser reaches its terminal
//! event. The joiner guarantees that exactly one of {email emitted,
//! transaction failed} happens per transaction — never both, never
//! neither.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::timeout;
use tracing::debug;

use crate::classify::Classifier;
use crate::error::AnnotateError;
use crate::message::{InboundEmail, ParsedEmail, SpamReport};
use crate::parse::ParserStage;

// ── Join state ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Pending,
    Complete,
    Failed,
}

struct JoinState {
    report: Option<SpamReport>,
    failure: Option<AnnotateError>,
    phase: Phase,
}

/// Per-transaction join object. Updated by the two stage completion
/// handlers; emits at most once.
pub struct Joiner {
    state: Mutex<JoinState>,
}

impl Joiner {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(JoinState {
                report: None,
                failure: None,
                phase: Phase::Pending,
            }),
        }
    }

    /// Capture the classifier's verdict. Ignored once the joiner is terminal.
    pub fn record_report(&self, report: SpamReport) {
        let mut state = self.state.lock().unwrap();
        if state.phase == Phase::Pending {
            state.report = Some(report);
        }
    }

    /// Record a stage failure. Only the first failure transitions the
    /// joiner; redundant errors are swallowed. Returns whether this call
    /// was the one that failed the transaction.
    pub fn record_failure(&self, err: AnnotateError) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.phase == Phase::Pending {
            state.phase = Phase::Failed;
            state.failure = Some(err);
            true
        } else {
            false
        }
    }

    /// Parser-terminal handler: emit the annotated email exactly once,
    /// provided no prior failure was recorded.
    pub fn complete(&self, parsed: ParsedEmail) -> Option<InboundEmail> {
        let mut state = self.state.lock().unwrap();
        if state.phase != Phase::Pending {
            return None;
        }
        state.phase = Phase::Complete;
        let report = state.report.take();
        Some(parsed.annotated(report))
    }

    /// The recorded failure, if the joiner is in the failed state.
    pub fn failure(&self) -> Option<AnnotateError> {
        self.state.lock().unwrap().failure.clone()
    }

    pub fn is_failed(&self) -> bool {
        self.state.lock().unwrap().phase == Phase::Failed
    }
}

impl Default for Joiner {
    fn default() -> Self {
        Self::new()
    }
}

// ── Driver ──────────────────────────────────────────────────────────

/// Drives one joiner per transaction over the two annotation stages.
pub struct Annotator {
    classifier: Arc<dyn Classifier>,
    parser: Arc<dyn ParserStage>,
    /// A classifier that stalls past this deadline fails the transaction
    /// instead of hanging it.
    classify_timeout: Duration,
}

impl Annotator {
    pub fn new(
        classifier: Arc<dyn Classifier>,
        parser: Arc<dyn ParserStage>,
        classify_timeout: Duration,
    ) -> Self {
        Self {
            classifier,
            parser,
            classify_timeout,
        }
    }

    /// Run both stages over the transaction bytes and join them into one
    /// annotated email, or fail the transaction on the first stage error.
    pub async fn annotate(&self, raw: &[u8]) -> Result<InboundEmail, AnnotateError> {
        let joiner = Joiner::new();

        match timeout(self.classify_timeout, self.classifier.classify(raw)).await {
            Ok(Ok(report)) => joiner.record_report(report),
            Ok(Err(err)) => {
                joiner.record_failure(err);
            }
            Err(_) => {
                joiner.record_failure(AnnotateError::ClassifierTimeout {
                    secs: self.classify_timeout.as_secs(),
                });
            }
        }
        if let Some(err) = joiner.failure() {
            debug!(error = %err, "classifier stage failed, rejecting transaction");
            return Err(err);
        }

        let parsed = match self.parser.parse(raw).await {
            Ok(parsed) => parsed,
            Err(err) => {
                joiner.record_failure(err.clone());
                return Err(err);
            }
        };

        match joiner.complete(parsed) {
            Some(email) => Ok(email),
            None => Err(joiner
                .failure()
                .unwrap_or_else(|| AnnotateError::Stream("transaction already terminal".into()))),
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────
