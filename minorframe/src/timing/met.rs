/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Pure MET → slot arithmetic.
//!
//! Free functions rather than engine methods so the rounding and wrap rules
//! can be tested without a clock.

/// Slot number for a position of `micros` within the current MET second.
///
/// Rounds up when `micros` is within one microsecond of the next slot
/// boundary, then wraps into `[0, total_slots)`.
pub fn met_slot_number(micros: u32, normal_slot_period_us: u32, total_slots: u16) -> u16 {
    if normal_slot_period_us == 0 || total_slots == 0 {
        return 0;
    }
    let mut slot = micros / normal_slot_period_us;
    let remainder = micros - slot * normal_slot_period_us;
    // One extra microsecond is enough to reach the next slot.
    slot += (remainder + 1) / normal_slot_period_us;
    (slot % u32::from(total_slots)) as u16
}

/// `met_slot` re-based so that `last_sync_met_slot` reads as slot 0.
pub fn offset_slot(met_slot: u16, last_sync_met_slot: u16, total_slots: u16) -> u16 {
    if met_slot < last_sync_met_slot {
        met_slot + (total_slots - last_sync_met_slot)
    } else {
        met_slot - last_sync_met_slot
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
