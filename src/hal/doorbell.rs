// CLASSIFICATION: COMMUNITY
// Filename: doorbell.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-17

//! Outbound signal bits.
//!
//! Writing 1 to a doorbell bit requests an action from the remote core,
//! writing 0 clears the request. The acknowledgement always arrives on a
//! separate [`EventChannel`](super::EventChannel).

use std::sync::atomic::{AtomicU32, Ordering};

use log::debug;

use super::regs::RegisterGroup;

/// A shared-state register holding several doorbell bits.
#[derive(Debug, Clone)]
pub struct SignalGroup {
    regs: RegisterGroup,
    offset: u32,
}

impl SignalGroup {
    /// Signal word at `offset` within `regs`.
    pub fn new(regs: RegisterGroup, offset: u32) -> Self {
        Self { regs, offset }
    }

    /// Current value of the whole signal word.
    pub fn value(&self) -> u32 {
        self.regs.read(self.offset)
    }

    /// Handle for one bit of this group.
    pub fn doorbell(&self, name: &'static str, bit: u32) -> Doorbell {
        Doorbell {
            name,
            group: self.clone(),
            mask: 1 << bit,
            raised: AtomicU32::new(0),
            cleared: AtomicU32::new(0),
        }
    }
}

/// One outbound signal bit.
#[derive(Debug)]
pub struct Doorbell {
    name: &'static str,
    group: SignalGroup,
    mask: u32,
    raised: AtomicU32,
    cleared: AtomicU32,
}

impl Doorbell {
    /// Doorbell name used in log lines.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Set the bit, requesting the action.
    pub fn raise(&self) {
        debug!("doorbell {} raised", self.name);
        self.group
            .regs
            .update_bits(self.group.offset, self.mask, self.mask);
        self.raised.fetch_add(1, Ordering::Relaxed);
    }

    /// Drop the bit, withdrawing the request.
    pub fn clear(&self) {
        debug!("doorbell {} cleared", self.name);
        self.group.regs.update_bits(self.group.offset, self.mask, 0);
        self.cleared.fetch_add(1, Ordering::Relaxed);
    }

    /// Whether the bit is currently set in hardware.
    pub fn is_raised(&self) -> bool {
        self.group.value() & self.mask != 0
    }

    /// Number of times the bit has been raised.
    pub fn raise_count(&self) -> u32 {
        self.raised.load(Ordering::Relaxed)
    }

    /// Number of times the bit has been cleared.
    pub fn clear_count(&self) -> u32 {
        self.cleared.load(Ordering::Relaxed)
    }
}
