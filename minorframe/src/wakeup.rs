/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Single-slot wakeup mailbox between the signal handlers and the main loop.
//!
//! Both the tone handler and the minor-frame timer call [`Wakeup::signal`];
//! the main loop consumes with [`Wakeup::wait`] or [`Wakeup::try_take`].
//! Any number of signals before a take collapse into **one** wakeup.  That is
//! safe because the scheduler recomputes how many slots to run from absolute
//! timing state on every wakeup; it never counts signals.
//!
//! The release and take counters make the coalescing observable:
//! `released() == taken() + coalesced() + pending()`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::Notify;

#[derive(Debug, Default)]
pub struct Wakeup {
    pending: AtomicBool,
    released: AtomicU64,
    taken: AtomicU64,
    notify: Notify,
}

impl Wakeup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Posts a wakeup.  Never blocks.
    pub fn signal(&self) {
        self.released.fetch_add(1, Ordering::Relaxed);
        self.pending.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    /// Consumes the pending wakeup, if any.
    pub fn try_take(&self) -> bool {
        if self.pending.swap(false, Ordering::AcqRel) {
            self.taken.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Waits until a wakeup is pending and consumes it.
    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            if self.try_take() {
                return;
            }
            notified.await;
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// Total `signal()` calls.
    pub fn released(&self) -> u64 {
        self.released.load(Ordering::Relaxed)
    }

    /// Wakeups actually delivered to the consumer.
    pub fn taken(&self) -> u64 {
        self.taken.load(Ordering::Relaxed)
    }

    /// Signals absorbed by an already-pending wakeup.
    pub fn coalesced(&self) -> u64 {
        let pending = u64::from(self.is_pending());
        self.released()
            .saturating_sub(self.taken())
            .saturating_sub(pending)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn nothing_pending_initially() {
        let w = Wakeup::new();
        assert!(!w.try_take());
        assert_eq!(w.coalesced(), 0);
    }

    #[test]
    fn multiple_signals_collapse_into_one_take() {
        let w = Wakeup::new();
        w.signal();
        w.signal();
        w.signal();

        assert!(w.try_take());
        assert!(!w.try_take());
        assert_eq!(w.released(), 3);
        assert_eq!(w.taken(), 1);
        assert_eq!(w.coalesced(), 2);
    }

    #[test]
    fn pending_wakeup_is_not_counted_as_coalesced() {
        let w = Wakeup::new();
        w.signal();
        assert!(w.is_pending());
        assert_eq!(w.coalesced(), 0);
    }

    #[tokio::test]
    async fn wait_returns_immediately_when_pending() {
        let w = Wakeup::new();
        w.signal();
        tokio::time::timeout(Duration::from_millis(100), w.wait())
            .await
            .unwrap();
        assert!(!w.is_pending());
    }

    #[tokio::test]
    async fn wait_is_released_by_another_task() {
        let w = Arc::new(Wakeup::new());
        let producer = Arc::clone(&w);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            producer.signal();
        });

        tokio::time::timeout(Duration::from_secs(1), w.wait())
            .await
            .unwrap();
        assert_eq!(w.taken(), 1);
    }
}
