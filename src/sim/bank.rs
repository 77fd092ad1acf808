// CLASSIFICATION: COMMUNITY
// Filename: bank.rs v0.2
// Author: Lukas Bower
// Date Modified: 2026-10-17

//! Simulated register bank.
//!
//! Registers default to zero. Models run inside the write, with the register
//! map locked, and derive status bits from control bits. Listeners run after
//! the map is unlocked and may peek at any register; they stand in for the
//! firmware reacting to a write.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};

use crate::hal::RegisterBank;

pub type Model = Box<dyn Fn(&mut HashMap<u32, u32>, u32, u32) + Send + Sync>;
pub type Listener = Box<dyn Fn(&SimRegisterBank, u32, u32) + Send + Sync>;

pub struct SimRegisterBank {
    name: &'static str,
    regs: Mutex<HashMap<u32, u32>>,
    models: Mutex<Vec<Model>>,
    listeners: Mutex<Vec<Listener>>,
    log: Mutex<Vec<(u32, u32)>>,
}

impl fmt::Debug for SimRegisterBank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimRegisterBank")
            .field("name", &self.name)
            .field("regs", &*relock(&self.regs))
            .finish()
    }
}

fn relock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl SimRegisterBank {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            regs: Mutex::new(HashMap::new()),
            models: Mutex::new(Vec::new()),
            listeners: Mutex::new(Vec::new()),
            log: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Set a register without running models, listeners or the write log.
    pub fn poke(&self, offset: u32, value: u32) {
        relock(&self.regs).insert(offset, value);
    }

    pub fn peek(&self, offset: u32) -> u32 {
        relock(&self.regs).get(&offset).copied().unwrap_or(0)
    }

    /// Copy of every register that has ever held a value.
    pub fn snapshot(&self) -> HashMap<u32, u32> {
        relock(&self.regs).clone()
    }

    pub fn add_model(&self, model: Model) {
        relock(&self.models).push(model);
    }

    pub fn add_listener(&self, listener: Listener) {
        relock(&self.listeners).push(listener);
    }

    /// Every `(offset, value)` written through [`RegisterBank::write`].
    pub fn writes(&self) -> Vec<(u32, u32)> {
        relock(&self.log).clone()
    }

    /// Offsets written at least once, in first-write order.
    pub fn written_offsets(&self) -> Vec<u32> {
        let mut seen = Vec::new();
        for (off, _) in relock(&self.log).iter() {
            if !seen.contains(off) {
                seen.push(*off);
            }
        }
        seen
    }

    pub fn clear_log(&self) {
        relock(&self.log).clear();
    }
}

impl RegisterBank for SimRegisterBank {
    fn read(&self, offset: u32) -> u32 {
        self.peek(offset)
    }

    fn write(&self, offset: u32, value: u32) {
        {
            let mut regs = relock(&self.regs);
            regs.insert(offset, value);
            for model in relock(&self.models).iter() {
                model(&mut regs, offset, value);
            }
        }
        relock(&self.log).push((offset, value));
        for listener in relock(&self.listeners).iter() {
            listener(self, offset, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn models_derive_status_and_listeners_observe() {
        let bank = SimRegisterBank::new("t");
        bank.add_model(Box::new(|regs: &mut HashMap<u32, u32>, off: u32, val: u32| {
            if off == 0x0 {
                regs.insert(0x4, val & 1);
            }
        }));
        let seen = Arc::new(AtomicU32::new(0));
        let s = seen.clone();
        bank.add_listener(Box::new(move |b: &SimRegisterBank, _: u32, _: u32| {
            s.store(b.peek(0x4), Ordering::SeqCst);
        }));

        bank.write(0x0, 0x3);
        assert_eq!(bank.read(0x4), 1);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        bank.poke(0x8, 7);
        assert_eq!(bank.written_offsets(), vec![0x0]);
    }
}
