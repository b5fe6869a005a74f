//! Error types for mailcast.

/// Top-level error type for the relay.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Annotation error: {0}")]
    Annotate(#[from] AnnotateError),

    #[error("Routing error: {0}")]
    Route(#[from] RouteError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("TLS material error: {0}")]
    Tls(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Mailbox registry errors.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Access token mismatch for mailbox {mailbox}")]
    AuthMismatch { mailbox: String },

    #[error("No live registration for mailbox {mailbox}")]
    NotFound { mailbox: String },
}

/// Annotation-stage errors. All of these are transaction-fatal: the SMTP
/// layer rejects the transaction and no email reaches the router.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AnnotateError {
    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Classifier failed: {0}")]
    Classify(String),

    #[error("Parser failed: {0}")]
    Parse(String),

    #[error("Classifier produced no verdict within {secs}s")]
    ClassifierTimeout { secs: u64 },
}

/// Delivery routing errors.
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("Message has no recipients")]
    NoRecipients,

    #[error("No live mailbox among {count} recipients")]
    Undeliverable { count: usize },
}

/// Outbound reply transport errors. Logged only: never retried, never
/// surfaced to the original sender.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Invalid address {address}: {reason}")]
    BadAddress { address: String, reason: String },

    #[error("Failed to build reply message: {reason}")]
    Build { reason: String },

    #[error("Reply transmission failed: {reason}")]
    SendFailed { reason: String },
}

/// Result type alias for the relay.
pub type Result<T> = std::result::Result<T, Error>;
