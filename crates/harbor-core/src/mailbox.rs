//! Bounded per-session outbound mailbox.
//!
//! The mailbox decouples the hub's fan-out from a slow consumer. The
//! sending half lives in the hub's session handle; the receiving half is
//! owned exclusively by the session's write loop. Enqueueing never
//! blocks: a full mailbox is a capacity error, and the hub's policy is
//! to disconnect the slow session rather than buffer or wait.

use harbor_protocol::Envelope;
use thiserror::Error;
use tokio::sync::mpsc;

/// Default mailbox capacity in messages.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 256;

/// Mailbox errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MailboxError {
    /// The mailbox is at capacity.
    #[error("Mailbox full")]
    Full,

    /// The owning session has closed its receiving half.
    #[error("Mailbox closed")]
    Closed,
}

/// Create a bounded mailbox pair.
#[must_use]
pub fn mailbox(capacity: usize) -> (Mailbox, Outbox) {
    let (tx, rx) = mpsc::channel(capacity);
    (Mailbox { tx, capacity }, Outbox { rx })
}

/// Sending half of a session's mailbox, held by the hub.
#[derive(Debug, Clone)]
pub struct Mailbox {
    tx: mpsc::Sender<Envelope>,
    capacity: usize,
}

impl Mailbox {
    /// Enqueue a message without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`MailboxError::Full`] when the queue is at capacity and
    /// [`MailboxError::Closed`] when the session has gone away. Both are
    /// terminal for delivery of this particular message; nothing is
    /// retried.
    pub fn enqueue(&self, envelope: Envelope) -> Result<(), MailboxError> {
        self.tx.try_send(envelope).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => MailboxError::Full,
            mpsc::error::TrySendError::Closed(_) => MailboxError::Closed,
        })
    }

    /// Get the mailbox capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Check whether the receiving half has been dropped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Receiving half of a session's mailbox, owned by the write loop.
///
/// Only the owning session ever drains this. When the hub unregisters
/// the session it drops the sending half; `recv` then yields whatever is
/// still buffered and ends with `None`, which is the bounded flush the
/// shutdown path relies on.
#[derive(Debug)]
pub struct Outbox {
    rx: mpsc::Receiver<Envelope>,
}

impl Outbox {
    /// Receive the next queued message, in FIFO enqueue order.
    ///
    /// Returns `None` once the mailbox is closed and drained.
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.rx.recv().await
    }

    /// Receive without waiting.
    ///
    /// # Errors
    ///
    /// Returns an error if the mailbox is currently empty or closed.
    pub fn try_recv(&mut self) -> Result<Envelope, mpsc::error::TryRecvError> {
        self.rx.try_recv()
    }

    /// Close the mailbox from the owning side.
    ///
    /// Idempotent. Subsequent enqueues from the hub become no-ops
    /// ([`MailboxError::Closed`]); already-queued messages can still be
    /// drained.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harbor_protocol::MsgKind;

    fn msg(content: &str) -> Envelope {
        Envelope::new(MsgKind::Message).with_content(content)
    }

    #[tokio::test]
    async fn test_enqueue_fifo_order() {
        let (mb, mut out) = mailbox(4);

        mb.enqueue(msg("a")).unwrap();
        mb.enqueue(msg("b")).unwrap();

        assert_eq!(out.recv().await.unwrap().content.as_deref(), Some("a"));
        assert_eq!(out.recv().await.unwrap().content.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_enqueue_full_never_blocks() {
        let (mb, _out) = mailbox(2);

        mb.enqueue(msg("a")).unwrap();
        mb.enqueue(msg("b")).unwrap();
        assert_eq!(mb.enqueue(msg("c")), Err(MailboxError::Full));
    }

    #[tokio::test]
    async fn test_closed_mailbox_is_noop() {
        let (mb, mut out) = mailbox(2);

        mb.enqueue(msg("a")).unwrap();
        out.close();
        out.close(); // Idempotent.

        assert_eq!(mb.enqueue(msg("b")), Err(MailboxError::Closed));
        assert!(mb.is_closed());

        // Already-queued messages survive the close.
        assert_eq!(out.recv().await.unwrap().content.as_deref(), Some("a"));
        assert!(out.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_drop_sender_flushes_then_ends() {
        let (mb, mut out) = mailbox(4);

        mb.enqueue(msg("a")).unwrap();
        mb.enqueue(msg("b")).unwrap();
        drop(mb);

        assert_eq!(out.recv().await.unwrap().content.as_deref(), Some("a"));
        assert_eq!(out.recv().await.unwrap().content.as_deref(), Some("b"));
        assert!(out.recv().await.is_none());
    }
}
