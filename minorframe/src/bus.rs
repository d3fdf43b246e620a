/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Message bus seam used by the entry dispatcher.

use std::collections::BTreeSet;

use tracing::trace;

use crate::scheduler::BusError;

/// Delivers one pre-serialised message.  Retries, if any, are the bus's
/// business; the dispatcher only counts the outcome.
pub trait MessageBus {
    fn send(&mut self, message: &[u16]) -> Result<(), BusError>;
}

/// Bus that traces every message instead of delivering it.
///
/// With a subscriber set, messages for ids nobody subscribed to fail with
/// [`BusError::NoSubscribers`], like a real software bus would report.
#[derive(Debug, Default)]
pub struct TracingBus {
    subscribers: Option<BTreeSet<u16>>,
    delivered: u64,
}

impl TracingBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_subscribers(ids: impl IntoIterator<Item = u16>) -> Self {
        Self {
            subscribers: Some(ids.into_iter().collect()),
            delivered: 0,
        }
    }

    pub fn delivered(&self) -> u64 {
        self.delivered
    }
}

impl MessageBus for TracingBus {
    fn send(&mut self, message: &[u16]) -> Result<(), BusError> {
        let Some(&message_id) = message.first() else {
            return Err(BusError::Truncated { words: 0 });
        };

        if let Some(subscribers) = &self.subscribers {
            if !subscribers.contains(&message_id) {
                return Err(BusError::NoSubscribers { message_id });
            }
        }

        self.delivered += 1;
        trace!(
            message_id = format_args!("{:#06X}", message_id),
            words = message.len(),
            "Message sent"
        );
        Ok(())
    }
}
