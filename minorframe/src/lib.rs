/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! minorframe – table-driven minor-frame slot scheduler
//!
//! Module layout:
//!
//! ```text
//! lib.rs
//! ├── config/      – scheduler constants (YAML) and derived timing values
//! ├── table/       – schedule/message tables, validation, table images
//! ├── timing/      – major/minor frame synchronisation, MET arithmetic
//! ├── scheduler/   – slot catch-up policy and per-entry dispatch
//! ├── commands     – deferred enable/disable commands
//! ├── events       – diagnostic events and the filtering tracing sink
//! ├── bus          – message bus seam
//! ├── wakeup       – coalescing wakeup mailbox
//! ├── context      – engine + scheduler owner, housekeeping snapshot
//! ├── control      – runtime requests, handle and timed command scripts
//! └── runtime      – tokio timer, tone and main-loop tasks
//! ```

pub mod bus;
pub mod commands;
pub mod config;
pub mod context;
pub mod control;
pub mod events;
pub mod runtime;
pub mod scheduler;
pub mod table;
pub mod timing;
pub mod wakeup;

#[cfg(test)]
mod test_support;
