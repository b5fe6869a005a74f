//! Mailbox registry — tracks which mailbox names currently have a live
//! interactive connection.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tracing::debug;

use crate::error::RegistryError;

/// Handle for delivering serialized frames to one live connection.
pub type ConnectionHandle = mpsc::UnboundedSender<String>;

struct MailboxEntry {
    access_token: String,
    /// Identifies which physical connection owns this entry, so a stale
    /// disconnect cannot wipe out the entry a reconnect just installed.
    conn_id: u64,
    handle: ConnectionHandle,
}

/// Registry of live mailbox connections. One instance per server; every
/// method takes the lock because register, lookup, and unregister race
/// across independent connection tasks.
#[derive(Default)]
pub struct MailboxRegistry {
    entries: Mutex<HashMap<String, MailboxEntry>>,
    next_conn: AtomicU64,
}

impl MailboxRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an identity for a new connection.
    pub fn next_conn_id(&self) -> u64 {
        self.next_conn.fetch_add(1, Ordering::Relaxed)
    }

    /// Insert or replace the entry for `mailbox`.
    ///
    /// A matching access token is treated as a reconnect and replaces the
    /// entry (dropping the old handle closes the old connection's pump).
    /// A mismatched token rejects the new connection and leaves the
    /// registry untouched.
    pub fn register(
        &self,
        mailbox: &str,
        access_token: &str,
        conn_id: u64,
        handle: ConnectionHandle,
    ) -> Result<(), RegistryError> {
        let mut entries = self.entries.lock().unwrap();

        if let Some(existing) = entries.get(mailbox)
            && existing.access_token != access_token
        {
            return Err(RegistryError::AuthMismatch {
                mailbox: mailbox.to_string(),
            });
        }

        if entries
            .insert(
                mailbox.to_string(),
                MailboxEntry {
                    access_token: access_token.to_string(),
                    conn_id,
                    handle,
                },
            )
            .is_some()
        {
            debug!(mailbox = %mailbox, "replaced existing registration (reconnect)");
        }
        Ok(())
    }

    /// Look up the live connection handle for `mailbox`.
    pub fn lookup(&self, mailbox: &str) -> Result<ConnectionHandle, RegistryError> {
        let entries = self.entries.lock().unwrap();
        entries
            .get(mailbox)
            .map(|entry| entry.handle.clone())
            .ok_or_else(|| RegistryError::NotFound {
                mailbox: mailbox.to_string(),
            })
    }

    /// Idempotent removal. A no-op if the mailbox is absent or the entry
    /// now belongs to a newer connection.
    pub fn unregister(&self, mailbox: &str, conn_id: u64) {
        let mut entries = self.entries.lock().unwrap();
        if entries
            .get(mailbox)
            .is_some_and(|entry| entry.conn_id == conn_id)
        {
            entries.remove(mailbox);
        }
    }

    pub fn contains(&self, mailbox: &str) -> bool {
        let entries = self.entries.lock().unwrap();
        entries.contains_key(mailbox)
    }

    pub fn is_empty(&self) -> bool {
        let entries = self.entries.lock().unwrap();
        entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> (ConnectionHandle, mpsc::UnboundedReceiver<String>) {
        mpsc::unbounded_channel()
    }

    #[test]
    fn register_then_lookup() {
        let registry = MailboxRegistry::new();
        let (tx, mut rx) = handle();
        registry.register("alice", "t0k3n", 1, tx).unwrap();

        let found = registry.lookup("alice").unwrap();
        found.send("frame".to_string()).unwrap();
        assert_eq!(rx.try_recv().unwrap(), "frame");
    }

    #[test]
    fn lookup_unknown_mailbox_is_not_found() {
        let registry = MailboxRegistry::new();
        assert!(matches!(
            registry.lookup("ghost"),
            Err(RegistryError::NotFound { .. })
        ));
    }

    #[test]
    fn unregister_never_registered_is_noop() {
        let registry = MailboxRegistry::new();
        registry.unregister("ghost", 42);
        assert!(registry.is_empty());
    }

    #[test]
    fn mismatched_token_is_rejected_and_entry_kept() {
        let registry = MailboxRegistry::new();
        let (tx1, _rx1) = handle();
        registry.register("alice", "t0k3n", 1, tx1).unwrap();

        let (tx2, _rx2) = handle();
        let err = registry.register("alice", "wrong", 2, tx2).unwrap_err();
        assert!(matches!(err, RegistryError::AuthMismatch { .. }));
        assert!(registry.contains("alice"));
        // Original connection still owns the entry.
        registry.unregister("alice", 1);
        assert!(!registry.contains("alice"));
    }

    #[test]
    fn matching_token_replaces_entry() {
        let registry = MailboxRegistry::new();
        let (tx1, mut rx1) = handle();
        registry.register("alice", "t0k3n", 1, tx1).unwrap();

        let (tx2, mut rx2) = handle();
        registry.register("alice", "t0k3n", 2, tx2).unwrap();

        // Old handle is dropped: its receiver observes disconnect.
        assert!(matches!(
            rx1.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));

        registry
            .lookup("alice")
            .unwrap()
            .send("frame".to_string())
            .unwrap();
        assert_eq!(rx2.try_recv().unwrap(), "frame");
    }

    #[test]
    fn stale_unregister_after_reconnect_is_noop() {
        let registry = MailboxRegistry::new();
        let (tx1, _rx1) = handle();
        registry.register("alice", "t0k3n", 1, tx1).unwrap();
        let (tx2, _rx2) = handle();
        registry.register("alice", "t0k3n", 2, tx2).unwrap();

        // The replaced connection's close event must not remove the new entry.
        registry.unregister("alice", 1);
        assert!(registry.contains("alice"));

        registry.unregister("alice", 2);
        assert!(!registry.contains("alice"));
    }
}
