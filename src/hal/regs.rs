// CLASSIFICATION: COMMUNITY
// Filename: regs.rs v0.2
// Author: Lukas Bower
// Date Modified: 2026-10-17

//! Register bank access.
//!
//! A [`RegisterBank`] is a flat window of 32-bit registers addressed by byte
//! offset. A [`RegisterGroup`] pairs a bank with the lock that serialises
//! read/modify/write sequences on it. Groups shared between a parent core and
//! its children are cloned, so every clone contends on the same lock while
//! unrelated groups never block each other.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use log::trace;

/// Raw 32-bit register window.
pub trait RegisterBank: Send + Sync {
    /// Read the register at `offset`.
    fn read(&self, offset: u32) -> u32;
    /// Write `value` to the register at `offset`.
    fn write(&self, offset: u32, value: u32);
}

/// A named register bank plus its resource-scoped lock.
#[derive(Clone)]
pub struct RegisterGroup {
    name: &'static str,
    bank: Arc<dyn RegisterBank>,
    lock: Arc<Mutex<()>>,
}

impl fmt::Debug for RegisterGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisterGroup").field("name", &self.name).finish()
    }
}

impl RegisterGroup {
    /// Wrap `bank` with a fresh lock.
    pub fn new(name: &'static str, bank: Arc<dyn RegisterBank>) -> Self {
        Self {
            name,
            bank,
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Group name used in log lines.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// True when both handles guard the same physical group.
    pub fn same_group(&self, other: &RegisterGroup) -> bool {
        Arc::ptr_eq(&self.lock, &other.lock)
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        // The lock protects no data of its own, so a poisoned guard is still usable.
        self.lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Read one register under the group lock.
    pub fn read(&self, offset: u32) -> u32 {
        let _g = self.guard();
        let v = self.bank.read(offset);
        trace!("{} rd 0x{offset:04x} -> 0x{v:08x}", self.name);
        v
    }

    /// Write one register under the group lock.
    pub fn write(&self, offset: u32, value: u32) {
        let _g = self.guard();
        trace!("{} wr 0x{offset:04x} <- 0x{value:08x}", self.name);
        self.bank.write(offset, value);
    }

    /// Atomically replace the bits selected by `mask` with `value & mask`.
    /// Returns the value written.
    pub fn update_bits(&self, offset: u32, mask: u32, value: u32) -> u32 {
        let _g = self.guard();
        let old = self.bank.read(offset);
        let new = (old & !mask) | (value & mask);
        trace!(
            "{} rmw 0x{offset:04x} 0x{old:08x} -> 0x{new:08x}",
            self.name
        );
        self.bank.write(offset, new);
        new
    }

    /// Set `bits`, leaving the rest of the register alone.
    pub fn set_bits(&self, offset: u32, bits: u32) -> u32 {
        self.update_bits(offset, bits, bits)
    }

    /// Clear `bits`, leaving the rest of the register alone.
    pub fn clear_bits(&self, offset: u32, bits: u32) -> u32 {
        self.update_bits(offset, bits, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimRegisterBank;

    #[test]
    fn update_bits_only_touches_mask() {
        let bank = Arc::new(SimRegisterBank::new("t"));
        bank.poke(0x10, 0xF0F0_0000);
        let g = RegisterGroup::new("t", bank.clone());
        assert_eq!(g.update_bits(0x10, 0x1F, 0x15), 0xF0F0_0015);
        g.clear_bits(0x10, 0xF000_0000);
        assert_eq!(g.read(0x10), 0x00F0_0015);
    }

    #[test]
    fn clones_share_lock() {
        let bank = Arc::new(SimRegisterBank::new("t"));
        let a = RegisterGroup::new("t", bank.clone());
        let b = a.clone();
        let c = RegisterGroup::new("t", bank);
        assert!(a.same_group(&b));
        assert!(!a.same_group(&c));
    }
}
