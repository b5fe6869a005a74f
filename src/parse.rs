//! Parser collaborator — structures raw message bytes via mail-parser.

use async_trait::async_trait;
use mail_parser::MessageParser;
use uuid::Uuid;

use crate::error::AnnotateError;
use crate::message::{Address, ParsedEmail};

/// A byte-stream parser: consumes the transaction bytes and yields one
/// structured message or one error.
#[async_trait]
pub trait ParserStage: Send + Sync {
    async fn parse(&self, raw: &[u8]) -> Result<ParsedEmail, AnnotateError>;
}

/// mail-parser backed implementation.
pub struct MailParserStage;

#[async_trait]
impl ParserStage for MailParserStage {
    async fn parse(&self, raw: &[u8]) -> Result<ParsedEmail, AnnotateError> {
        let parsed = MessageParser::default()
            .parse(raw)
            .ok_or_else(|| AnnotateError::Parse("unparseable message".to_string()))?;

        let from = extract_addresses(parsed.from())
            .into_iter()
            .next()
            .unwrap_or_else(|| Address::new("unknown"));

        let to = extract_addresses(parsed.to());

        let reply_to = Some(extract_addresses(parsed.reply_to())).filter(|list| !list.is_empty());

        let subject = parsed.subject().unwrap_or("(no subject)").to_string();

        let message_id = parsed
            .message_id()
            .map(str::to_string)
            .unwrap_or_else(|| format!("gen-{}", Uuid::new_v4()));

        let body = extract_text(&parsed);

        Ok(ParsedEmail {
            from,
            to,
            subject,
            message_id,
            reply_to,
            body,
        })
    }
}

/// Flatten a mail_parser address header into plain addresses.
fn extract_addresses(addr: Option<&mail_parser::Address>) -> Vec<Address> {
    let Some(addr) = addr else {
        return Vec::new();
    };
    match addr {
        mail_parser::Address::List(addrs) => addrs.iter().map(to_address).collect(),
        mail_parser::Address::Group(groups) => groups
            .iter()
            .flat_map(|g| g.addresses.iter().map(to_address))
            .collect(),
    }
}

fn to_address(addr: &mail_parser::Addr) -> Address {
    Address {
        name: addr.name.as_ref().map(|s| s.to_string()),
        address: addr
            .address
            .as_ref()
            .map(|s| s.to_string())
            .unwrap_or_default(),
    }
}

/// Extract readable text from a parsed message.
fn extract_text(parsed: &mail_parser::Message) -> String {
    if let Some(text) = parsed.body_text(0) {
        return text.to_string();
    }
    if let Some(html) = parsed.body_html(0) {
        return strip_html(html.as_ref());
    }
    "(no readable content)".to_string()
}

/// Strip HTML tags from content (basic).
pub fn strip_html(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    // Normalize whitespace
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const RAW: &[u8] = b"From: Alice Example <alice@example.com>\r\n\
To: bob@relay.test, carol@relay.test\r\n\
Subject: Greetings\r\n\
Message-ID: <m1@example.com>\r\n\
Reply-To: replies@example.com\r\n\
\r\n\
Hello Bob!\r\n";

    #[tokio::test]
    async fn parses_structured_fields() {
        let parsed = MailParserStage.parse(RAW).await.unwrap();

        assert_eq!(parsed.from.address, "alice@example.com");
        assert_eq!(parsed.from.name.as_deref(), Some("Alice Example"));
        assert_eq!(parsed.to.len(), 2);
        assert_eq!(parsed.to[0].address, "bob@relay.test");
        assert_eq!(parsed.to[1].address, "carol@relay.test");
        assert_eq!(parsed.subject, "Greetings");
        assert_eq!(parsed.message_id, "m1@example.com");
        assert_eq!(
            parsed.reply_to.unwrap()[0].address,
            "replies@example.com"
        );
        assert_eq!(parsed.body.trim(), "Hello Bob!");
    }

    #[tokio::test]
    async fn missing_message_id_is_synthesized() {
        let raw = b"From: a@x\r\nTo: b@y\r\nSubject: s\r\n\r\nbody\r\n";
        let parsed = MailParserStage.parse(raw).await.unwrap();
        assert!(parsed.message_id.starts_with("gen-"));
    }

    #[tokio::test]
    async fn missing_reply_to_is_none() {
        let raw = b"From: a@x\r\nTo: b@y\r\nSubject: s\r\n\r\nbody\r\n";
        let parsed = MailParserStage.parse(raw).await.unwrap();
        assert!(parsed.reply_to.is_none());
    }

    #[test]
    fn strip_html_basic() {
        assert_eq!(strip_html("<p>Hello</p>"), "Hello");
    }

    #[test]
    fn strip_html_nested_tags() {
        assert_eq!(
            strip_html("<div><b>Bold</b> and <i>italic</i></div>"),
            "Bold and italic"
        );
    }

    #[test]
    fn strip_html_whitespace_normalized() {
        assert_eq!(strip_html("<p>  Hello   World  </p>"), "Hello World");
    }
}
