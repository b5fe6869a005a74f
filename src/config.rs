//! Relay configuration, built from environment variables.

use std::path::PathBuf;
use std::time::Duration;

/// Bind target for the interactive transport: a TCP port or a
/// filesystem-backed socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsBind {
    Tcp(u16),
    Unix(PathBuf),
}

impl WsBind {
    /// A value that parses as a number is a TCP port; anything else is a
    /// filesystem path.
    pub fn parse(value: &str) -> Self {
        match value.parse::<u16>() {
            Ok(port) => WsBind::Tcp(port),
            Err(_) => WsBind::Unix(PathBuf::from(value)),
        }
    }
}

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Bind host for both listeners.
    pub host: String,
    /// SMTP bind host (defaults to `host`).
    pub smtp_host: String,
    /// SMTP listen port.
    pub smtp_port: u16,
    /// Interactive transport bind target.
    pub ws_bind: WsBind,
    /// PEM certificate path for SMTP TLS (optional).
    pub tls_cert: Option<PathBuf>,
    /// PEM private key path for SMTP TLS (optional).
    pub tls_key: Option<PathBuf>,
    /// Host domain used in generated reply message-ids.
    pub domain: String,
    /// SMTP relay for auto-replies. Unset means replies are logged and dropped.
    pub outbound_relay: Option<String>,
    /// How long the classifier may run before the transaction is failed.
    pub classify_timeout: Duration,
}

impl Config {
    /// Build config from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let host = std::env::var("MAILCAST_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        let smtp_host = std::env::var("MAILCAST_SMTP_HOST").unwrap_or_else(|_| host.clone());

        let smtp_port: u16 = std::env::var("MAILCAST_SMTP_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(25);

        let ws_bind = std::env::var("MAILCAST_WS_BIND")
            .map(|s| WsBind::parse(&s))
            .unwrap_or(WsBind::Tcp(12321));

        let tls_cert = std::env::var("MAILCAST_TLS_CERT").ok().map(PathBuf::from);
        let tls_key = std::env::var("MAILCAST_TLS_KEY").ok().map(PathBuf::from);

        let domain = std::env::var("MAILCAST_DOMAIN").unwrap_or_else(|_| "localhost".to_string());

        let outbound_relay = std::env::var("MAILCAST_OUTBOUND_RELAY").ok();

        let classify_timeout_secs: u64 = std::env::var("MAILCAST_CLASSIFY_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10);

        Self {
            host,
            smtp_host,
            smtp_port,
            ws_bind,
            tls_cert,
            tls_key,
            domain,
            outbound_relay,
            classify_timeout: Duration::from_secs(classify_timeout_secs),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            smtp_host: "0.0.0.0".to_string(),
            smtp_port: 25,
            ws_bind: WsBind::Tcp(12321),
            tls_cert: None,
            tls_key: None,
            domain: "localhost".to_string(),
            outbound_relay: None,
            classify_timeout: Duration::from_secs(10),
        }
    }
}
