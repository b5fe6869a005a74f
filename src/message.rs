//! Message data model: addresses, inbound mail, spam verdicts, auto-replies.

use serde::{Deserialize, Serialize};

// ── Addresses ───────────────────────────────────────────────────────

/// A mail address with an optional display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub name: Option<String>,
    pub address: String,
}

impl Address {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            name: None,
            address: address.into(),
        }
    }

    pub fn named(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            address: address.into(),
        }
    }

    /// The mailbox name: everything before the `@`.
    ///
    /// An address without an `@` is treated as a bare mailbox name.
    pub fn local_part(&self) -> &str {
        self.address.split('@').next().unwrap_or(&self.address)
    }
}

// ── Spam verdict ────────────────────────────────────────────────────

/// Opaque verdict produced by the classifier collaborator.
///
/// The core only attaches and serializes this; it never interprets it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpamReport {
    pub verdict: String,
    pub score: f32,
    pub symbols: Vec<String>,
}

impl SpamReport {
    /// Neutral verdict for messages that went through no real classifier.
    pub fn none() -> Self {
        Self {
            verdict: "none".to_string(),
            score: 0.0,
            symbols: Vec::new(),
        }
    }
}

// ── Inbound mail ────────────────────────────────────────────────────

/// Parser output: a structured message without its spam annotation.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedEmail {
    pub from: Address,
    pub to: Vec<Address>,
    pub subject: String,
    pub message_id: String,
    pub reply_to: Option<Vec<Address>>,
    pub body: String,
}

impl ParsedEmail {
    /// Attach the captured spam verdict, producing the final inbound email.
    pub fn annotated(self, spam_report: Option<SpamReport>) -> InboundEmail {
        InboundEmail {
            from: self.from,
            to: self.to,
            subject: self.subject,
            message_id: self.message_id,
            reply_to: self.reply_to,
            body: self.body,
            spam_report,
        }
    }
}

/// A fully-annotated inbound message, emitted exactly once per accepted
/// SMTP transaction. Immutable once handed to the delivery router.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundEmail {
    pub from: Address,
    pub to: Vec<Address>,
    pub subject: String,
    pub message_id: String,
    pub reply_to: Option<Vec<Address>>,
    pub body: String,
    pub spam_report: Option<SpamReport>,
}

// ── Wire payload ────────────────────────────────────────────────────

/// Frame delivered to an interactive client: `{"type": "email", "value": ...}`.
#[derive(Debug, Serialize)]
pub struct DeliveryFrame<'a> {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub value: &'a InboundEmail,
}

impl<'a> DeliveryFrame<'a> {
    pub fn email(value: &'a InboundEmail) -> Self {
        Self {
            kind: "email",
            value,
        }
    }
}

// ── Outbound reply ──────────────────────────────────────────────────

/// Automated acknowledgment, constructed fresh per delivery. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundReply {
    pub to: Vec<Address>,
    pub from: Address,
    pub subject: String,
    pub in_reply_to: String,
    pub references: Vec<String>,
    pub reply_to: Address,
    pub message_id: String,
    pub body: String,
    pub headers: Vec<(String, String)>,
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_part_strips_domain() {
        assert_eq!(Address::new("alice@example.com").local_part(), "alice");
    }

    #[test]
    fn local_part_of_bare_name_is_itself() {
        assert_eq!(Address::new("alice").local_part(), "alice");
    }

    #[test]
    fn delivery_frame_serializes_with_type_tag() {
        let email = ParsedEmail {
            from: Address::new("sender@example.com"),
            to: vec![Address::new("alice@relay.test")],
            subject: "Hello".into(),
            message_id: "m1@example.com".into(),
            reply_to: None,
            body: "Hi!".into(),
        }
        .annotated(Some(SpamReport::none()));

        let json = serde_json::to_string_pretty(&DeliveryFrame::email(&email)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["type"], "email");
        assert_eq!(value["value"]["messageId"], "m1@example.com");
        assert_eq!(value["value"]["spamReport"]["verdict"], "none");
        // Indented encoding per the wire contract.
        assert!(json.contains('\n'));
    }

    #[test]
    fn annotated_carries_report_through() {
        let parsed = ParsedEmail {
            from: Address::new("a@x"),
            to: vec![],
            subject: String::new(),
            message_id: "id".into(),
            reply_to: None,
            body: String::new(),
        };
        let email = parsed.annotated(None);
        assert!(email.spam_report.is_none());
    }
}
