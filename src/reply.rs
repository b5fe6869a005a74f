//! Auto-reply composer and outbound transport.
//!
//! Replies carry `Auto-Submitted: auto-reply` and a Reply-To pointing at
//! the matched mailbox, so mail agents neither auto-respond back nor loop
//! the conversation through the relay's sender.

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use lettre::message::header::{Header, HeaderName, HeaderValue};
use lettre::{Message, SmtpTransport, Transport};
use tracing::debug;

use crate::error::TransportError;
use crate::message::{Address, InboundEmail, OutboundReply};

const ACK_BODY: &str = "Mailcast received your email. Thanks!";

// ── Composition ─────────────────────────────────────────────────────

/// Build the acknowledgment for `original`, sent on behalf of the
/// recipient that actually received the delivery.
pub fn compose(original: &InboundEmail, matched: &Address, host_domain: &str) -> OutboundReply {
    let to = match &original.reply_to {
        Some(list) if !list.is_empty() => list.clone(),
        _ => vec![original.from.clone()],
    };

    OutboundReply {
        to,
        from: matched.clone(),
        subject: format!("Auto: {}", original.subject),
        in_reply_to: original.message_id.clone(),
        references: vec![original.message_id.clone()],
        reply_to: matched.clone(),
        message_id: fresh_message_id(host_domain),
        body: ACK_BODY.to_string(),
        headers: vec![("Auto-Submitted".to_string(), "auto-reply".to_string())],
    }
}

/// `<millis>.<hex of 8 random bytes>@<host_domain>` — unique per emission
/// without coordination across processes.
pub fn fresh_message_id(host_domain: &str) -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    let entropy: [u8; 8] = rand::random();
    let hex: String = entropy.iter().map(|b| format!("{b:02x}")).collect();
    format!("{millis}.{hex}@{host_domain}")
}

// ── Outbound transport ──────────────────────────────────────────────

/// Outbound transport collaborator. Dispatch is fire-and-forget from the
/// router's point of view: failures are logged, never retried, never
/// surfaced to the original SMTP transaction.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn dispatch(&self, reply: OutboundReply) -> Result<(), TransportError>;
}

/// Sends replies through an SMTP relay via lettre.
pub struct SmtpMailer {
    relay_host: String,
    relay_port: u16,
}

impl SmtpMailer {
    /// `relay` is `host` or `host:port`. A value with more than one colon
    /// is a bare IPv6 literal, taken as host-only on port 25.
    pub fn new(relay: &str) -> Self {
        let (relay_host, relay_port) = match relay.rsplit_once(':') {
            Some((host, port)) if !host.contains(':') => match port.parse::<u16>() {
                Ok(port) => (host.to_string(), port),
                Err(_) => (relay.to_string(), 25),
            },
            _ => (relay.to_string(), 25),
        };
        Self {
            relay_host,
            relay_port,
        }
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn dispatch(&self, reply: OutboundReply) -> Result<(), TransportError> {
        let relay_host = self.relay_host.clone();
        let relay_port = self.relay_port;

        // lettre's SmtpTransport is blocking.
        tokio::task::spawn_blocking(move || send_blocking(&relay_host, relay_port, &reply))
            .await
            .map_err(|e| TransportError::SendFailed {
                reason: format!("dispatch task failed: {e}"),
            })?
    }
}

fn send_blocking(
    relay_host: &str,
    relay_port: u16,
    reply: &OutboundReply,
) -> Result<(), TransportError> {
    let mut builder = Message::builder()
        .from(mailbox(&reply.from)?)
        .reply_to(mailbox(&reply.reply_to)?)
        .in_reply_to(reply.in_reply_to.clone())
        .references(reply.references.join(" "))
        .message_id(Some(format!("<{}>", reply.message_id)))
        .subject(reply.subject.clone())
        .header(AutoSubmitted);
    for addr in &reply.to {
        builder = builder.to(mailbox(addr)?);
    }

    let email = builder
        .body(reply.body.clone())
        .map_err(|e| TransportError::Build {
            reason: e.to_string(),
        })?;

    let transport = SmtpTransport::builder_dangerous(relay_host)
        .port(relay_port)
        .build();

    transport
        .send(&email)
        .map_err(|e| TransportError::SendFailed {
            reason: e.to_string(),
        })?;
    Ok(())
}

fn mailbox(addr: &Address) -> Result<lettre::message::Mailbox, TransportError> {
    let formatted = match &addr.name {
        Some(name) => format!("{name} <{}>", addr.address),
        None => addr.address.clone(),
    };
    formatted
        .parse()
        .map_err(|e: lettre::address::AddressError| TransportError::BadAddress {
            address: addr.address.clone(),
            reason: e.to_string(),
        })
}

/// `Auto-Submitted: auto-reply` (RFC 3834) — tells mail agents this is an
/// automated response so they suppress their own auto-replies.
#[derive(Debug, Clone)]
struct AutoSubmitted;

impl Header for AutoSubmitted {
    fn name() -> HeaderName {
        HeaderName::new_from_ascii_str("Auto-Submitted")
    }

    fn parse(_s: &str) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        Ok(Self)
    }

    fn display(&self) -> HeaderValue {
        HeaderValue::new(Self::name(), "auto-reply".to_string())
    }
}

/// Used when no outbound relay is configured: acknowledgments are logged
/// and dropped.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn dispatch(&self, reply: OutboundReply) -> Result<(), TransportError> {
        debug!(
            message_id = %reply.message_id,
            to = %reply.to.first().map(|a| a.address.as_str()).unwrap_or("<nobody>"),
            "no outbound relay configured, dropping auto-reply"
        );
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────────
