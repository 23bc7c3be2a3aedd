//! Single-slot coalescing mailbox.

use parking_lot::Mutex;
use tokio::sync::Notify;

/// Holds at most one pending value; posting replaces it.
///
/// The wake signal keeps a permit when nobody is waiting, so a value posted
/// before the receiver first waits is still observed.
pub struct Mailbox<T> {
    slot: Mutex<Option<T>>,
    notify: Notify,
}

impl<T> Mailbox<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            notify: Notify::new(),
        }
    }

    /// Stores `value`, dropping any value not yet received.
    pub fn post(&self, value: T) {
        *self.slot.lock() = Some(value);
        self.notify.notify_one();
    }

    /// Waits for the next value.
    pub async fn recv(&self) -> T {
        loop {
            if let Some(value) = self.slot.lock().take() {
                return value;
            }
            self.notify.notified().await;
        }
    }

    /// Returns true if a value is waiting.
    pub fn is_pending(&self) -> bool {
        self.slot.lock().is_some()
    }
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_test::{assert_pending, assert_ready_eq, task};

    #[test]
    fn test_post_before_recv_is_observed() {
        let mailbox = Mailbox::new();
        mailbox.post(1);
        let mut recv = task::spawn(mailbox.recv());
        assert_ready_eq!(recv.poll(), 1);
    }

    #[test]
    fn test_newer_value_overwrites_pending() {
        let mailbox = Mailbox::new();
        mailbox.post(1);
        mailbox.post(2);
        mailbox.post(3);
        assert!(mailbox.is_pending());

        let mut recv = task::spawn(mailbox.recv());
        assert_ready_eq!(recv.poll(), 3);
        drop(recv);

        // The leftover wake permit must not produce a phantom value.
        let mut next = task::spawn(mailbox.recv());
        assert_pending!(next.poll());
        mailbox.post(4);
        assert!(next.is_woken());
        assert_ready_eq!(next.poll(), 4);
    }

    #[tokio::test]
    async fn test_waiting_receiver_is_woken() {
        let mailbox = Arc::new(Mailbox::new());
        let waiter = tokio::spawn({
            let mailbox = Arc::clone(&mailbox);
            async move { mailbox.recv().await }
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        mailbox.post("hello");

        let got = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, "hello");
    }
}
