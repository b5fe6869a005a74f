//! Delivery router — maps an annotated inbound email to the first live
//! registered recipient.

use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::error::RouteError;
use crate::message::{DeliveryFrame, InboundEmail};
use crate::registry::MailboxRegistry;
use crate::reply::{self, Mailer};

/// Routes each accepted inbound email to at most one live connection.
///
/// Single-delivery policy: a message with several deliverable recipients
/// only notifies and replies to the first, in original recipient order.
pub struct DeliveryRouter {
    registry: Arc<MailboxRegistry>,
    mailer: Arc<dyn Mailer>,
    host_domain: String,
}

impl DeliveryRouter {
    pub fn new(registry: Arc<MailboxRegistry>, mailer: Arc<dyn Mailer>, host_domain: String) -> Self {
        Self {
            registry,
            mailer,
            host_domain,
        }
    }

    /// Deliver `email` to the first recipient with a live registration and
    /// trigger the acknowledgment for that recipient.
    ///
    /// Undeliverable messages are dropped: the error is for the caller's
    /// log only, the transaction has already been accepted.
    pub async fn route(&self, email: InboundEmail) -> Result<(), RouteError> {
        if email.to.is_empty() {
            warn!(message_id = %email.message_id, "dropping message with no recipients");
            return Err(RouteError::NoRecipients);
        }

        for recipient in &email.to {
            let mailbox = recipient.local_part();
            let handle = match self.registry.lookup(mailbox) {
                Ok(handle) => handle,
                Err(e) => {
                    warn!(error = %e, "recipient has no live connection");
                    continue;
                }
            };

            debug!(mailbox = %mailbox, message_id = %email.message_id, "delivering message");

            match serde_json::to_string_pretty(&DeliveryFrame::email(&email)) {
                Ok(frame) => {
                    // A send racing a disconnect fails; log and move on,
                    // the reply is still owed to the sender.
                    if let Err(e) = handle.send(frame) {
                        warn!(mailbox = %mailbox, error = %e, "delivery lost, connection gone");
                    }
                }
                Err(e) => error!(error = %e, "failed to serialize delivery frame"),
            }

            let ack = reply::compose(&email, recipient, &self.host_domain);
            if let Err(e) = self.mailer.dispatch(ack).await {
                error!(error = %e, "auto-reply dispatch failed");
            }
            return Ok(());
        }

        Err(RouteError::Undeliverable {
            count: email.to.len(),
        })
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::message::{Address, OutboundReply, ParsedEmail, SpamReport};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct RecordingMailer {
        sent: Mutex<Vec<OutboundReply>>,
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn dispatch(&self, reply: OutboundReply) -> Result<(), TransportError> {
            self.sent.lock().unwrap().push(reply);
            Ok(())
        }
    }

    fn email(to: &[&str]) -> InboundEmail {
        ParsedEmail {
            from: Address::new("sender@example.com"),
            to: to.iter().map(|a| Address::new(*a)).collect(),
            subject: "Hello".into(),
            message_id: "m1@example.com".into(),
            reply_to: None,
            body: "Hi!".into(),
        }
        .annotated(Some(SpamReport::none()))
    }

    fn router() -> (DeliveryRouter, Arc<MailboxRegistry>, Arc<RecordingMailer>) {
        let registry = Arc::new(MailboxRegistry::new());
        let mailer = Arc::new(RecordingMailer::default());
        let router = DeliveryRouter::new(
            Arc::clone(&registry),
            Arc::clone(&mailer) as Arc<dyn Mailer>,
            "relay.test".to_string(),
        );
        (router, registry, mailer)
    }

    #[tokio::test]
    async fn delivers_to_registered_recipient_and_acknowledges() {
        let (router, registry, mailer) = router();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.register("alice", "t0k3n", 1, tx).unwrap();

        router.route(email(&["alice@relay.test"])).await.unwrap();

        let frame = rx.try_recv().unwrap();
        let json: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(json["type"], "email");
        assert_eq!(json["value"]["subject"], "Hello");

        let sent = mailer.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject, "Auto: Hello");
        assert_eq!(sent[0].to[0].address, "sender@example.com");
        assert_eq!(sent[0].from.address, "alice@relay.test");
    }

    #[tokio::test]
    async fn unregistered_recipient_gets_no_delivery_and_no_reply() {
        let (router, _registry, mailer) = router();

        let err = router.route(email(&["bob@relay.test"])).await.unwrap_err();
        assert!(matches!(err, RouteError::Undeliverable { count: 1 }));
        assert!(mailer.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_recipient_list_is_rejected() {
        let (router, _registry, mailer) = router();

        let err = router.route(email(&[])).await.unwrap_err();
        assert!(matches!(err, RouteError::NoRecipients));
        assert!(mailer.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn stops_at_first_live_recipient() {
        let (router, registry, mailer) = router();
        let (alice_tx, mut alice_rx) = mpsc::unbounded_channel();
        registry.register("alice", "t0k3n", 1, alice_tx).unwrap();
        let (carol_tx, mut carol_rx) = mpsc::unbounded_channel();
        registry.register("carol", "t0k3n", 2, carol_tx).unwrap();

        router
            .route(email(&[
                "unregistered@relay.test",
                "alice@relay.test",
                "carol@relay.test",
            ]))
            .await
            .unwrap();

        // First live match wins; later registered recipients see nothing.
        assert!(alice_rx.try_recv().is_ok());
        assert!(carol_rx.try_recv().is_err());

        let sent = mailer.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].from.address, "alice@relay.test");
    }

    #[tokio::test]
    async fn send_racing_disconnect_is_logged_not_retried() {
        let (router, registry, mailer) = router();
        let (tx, rx) = mpsc::unbounded_channel();
        registry.register("alice", "t0k3n", 1, tx).unwrap();
        drop(rx); // connection gone, entry not yet unregistered

        // Routing still succeeds: the failed send is only logged, and the
        // acknowledgment still fires for the matched recipient.
        router.route(email(&["alice@relay.test"])).await.unwrap();
        assert_eq!(mailer.sent.lock().unwrap().len(), 1);
    }
}
