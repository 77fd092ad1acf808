// CLASSIFICATION: COMMUNITY
// Filename: mod.rs · power sequencer v0.2
// Author: Lukas Bower
// Date Modified: 2026-10-17

//! Register-level power sequencing for a remote core.
//!
//! A [`Recipe`] is an immutable, ordered list of [`Step`]s. The
//! [`PowerSequencer`] executes the family's power-up or power-down recipe
//! synchronously: delays and polls sleep the calling thread. Register access
//! goes through [`RegisterGroup`], so only the accesses that touch a shared
//! group are serialised against other cores.

pub mod recipes;

use std::fmt;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use crate::error::{Result, RprocError, SoftFailure};
use crate::hal::RegisterGroup;

pub use recipes::{Family, HaltResetParams, PowerIslandParams};

/// Which register group of a [`PowerDomain`] a step addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bank {
    /// Core subsystem control registers.
    Core,
    /// Always-on status/config block.
    Rmb,
    /// Interconnect halt ports and global config (shared).
    Halt,
    /// Block reset registers (shared).
    Reset,
}

/// The register groups a sequencer drives.
#[derive(Debug, Clone)]
pub struct PowerDomain {
    pub core: RegisterGroup,
    pub rmb: RegisterGroup,
    pub halt: RegisterGroup,
    pub reset: RegisterGroup,
}

impl PowerDomain {
    pub fn group(&self, bank: Bank) -> &RegisterGroup {
        match bank {
            Bank::Core => &self.core,
            Bank::Rmb => &self.rmb,
            Bank::Halt => &self.halt,
            Bank::Reset => &self.reset,
        }
    }
}

/// Predicate evaluated by a poll step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollCond {
    /// `value & mask == expect`
    Equals { mask: u32, expect: u32 },
    /// Any bit in the mask set.
    AnySet(u32),
    /// Every bit in the mask clear.
    AllClear(u32),
}

impl PollCond {
    pub fn holds(self, value: u32) -> bool {
        match self {
            PollCond::Equals { mask, expect } => value & mask == expect,
            PollCond::AnySet(mask) => value & mask != 0,
            PollCond::AllClear(mask) => value & mask == 0,
        }
    }
}

/// Whether a poll timeout aborts the recipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Fatal,
    Advisory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Write {
        bank: Bank,
        offset: u32,
        value: u32,
    },
    Update {
        bank: Bank,
        offset: u32,
        mask: u32,
        value: u32,
    },
    /// Read a register back to flush a posted write.
    ReadBack { bank: Bank, offset: u32 },
    Delay(Duration),
    Poll {
        bank: Bank,
        offset: u32,
        cond: PollCond,
        interval: Duration,
        timeout: Duration,
        severity: Severity,
    },
}

/// A step plus the name used in logs and errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabeledStep {
    pub label: &'static str,
    pub step: Step,
}

/// Immutable ordered step list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipe {
    name: &'static str,
    steps: Vec<LabeledStep>,
}

impl Recipe {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn steps(&self) -> &[LabeledStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Builder used by the recipe constructors in [`recipes`].
pub(crate) struct RecipeBuilder {
    name: &'static str,
    steps: Vec<LabeledStep>,
}

impl RecipeBuilder {
    pub(crate) fn new(name: &'static str) -> Self {
        Self {
            name,
            steps: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, label: &'static str, step: Step) -> &mut Self {
        self.steps.push(LabeledStep { label, step });
        self
    }

    pub(crate) fn write(&mut self, label: &'static str, bank: Bank, offset: u32, value: u32) -> &mut Self {
        self.push(label, Step::Write { bank, offset, value })
    }

    pub(crate) fn update(
        &mut self,
        label: &'static str,
        bank: Bank,
        offset: u32,
        mask: u32,
        value: u32,
    ) -> &mut Self {
        self.push(
            label,
            Step::Update {
                bank,
                offset,
                mask,
                value,
            },
        )
    }

    pub(crate) fn set(&mut self, label: &'static str, bank: Bank, offset: u32, bits: u32) -> &mut Self {
        self.update(label, bank, offset, bits, bits)
    }

    pub(crate) fn clear(&mut self, label: &'static str, bank: Bank, offset: u32, bits: u32) -> &mut Self {
        self.update(label, bank, offset, bits, 0)
    }

    pub(crate) fn read_back(&mut self, label: &'static str, bank: Bank, offset: u32) -> &mut Self {
        self.push(label, Step::ReadBack { bank, offset })
    }

    pub(crate) fn delay(&mut self, label: &'static str, d: Duration) -> &mut Self {
        self.push(label, Step::Delay(d))
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn poll(
        &mut self,
        label: &'static str,
        bank: Bank,
        offset: u32,
        cond: PollCond,
        interval: Duration,
        timeout: Duration,
        severity: Severity,
    ) -> &mut Self {
        self.push(
            label,
            Step::Poll {
                bank,
                offset,
                cond,
                interval,
                timeout,
                severity,
            },
        )
    }

    pub(crate) fn build(&mut self) -> Recipe {
        Recipe {
            name: self.name,
            steps: std::mem::take(&mut self.steps),
        }
    }
}

/// Outcome of a completed recipe run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceReport {
    pub recipe: &'static str,
    pub steps_run: usize,
    pub soft_failures: Vec<SoftFailure>,
    pub elapsed: Duration,
}

/// Direction of a power transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => f.write_str("power-up"),
            Direction::Down => f.write_str("power-down"),
        }
    }
}

/// Executes a core family's power recipes against its register groups.
#[derive(Debug)]
pub struct PowerSequencer {
    family: Family,
    domain: PowerDomain,
    up: Recipe,
    down: Recipe,
}

impl PowerSequencer {
    /// Build the recipes for `family` once; they never change afterwards.
    pub fn new(family: Family, domain: PowerDomain) -> Self {
        let (up, down) = family.recipes();
        Self {
            family,
            domain,
            up,
            down,
        }
    }

    pub fn family(&self) -> &Family {
        &self.family
    }

    pub fn domain(&self) -> &PowerDomain {
        &self.domain
    }

    pub fn recipe(&self, dir: Direction) -> &Recipe {
        match dir {
            Direction::Up => &self.up,
            Direction::Down => &self.down,
        }
    }

    pub fn power_up(&self) -> Result<SequenceReport> {
        self.run(Direction::Up)
    }

    pub fn power_down(&self) -> Result<SequenceReport> {
        self.run(Direction::Down)
    }

    fn run(&self, dir: Direction) -> Result<SequenceReport> {
        let recipe = self.recipe(dir);
        info!("{dir}: running {} ({} steps)", recipe.name, recipe.len());
        let start = Instant::now();
        let mut soft_failures = Vec::new();

        for (index, ls) in recipe.steps.iter().enumerate() {
            match self.exec(&ls.step) {
                Ok(()) => {}
                Err(StepError::Timeout { last, severity: Severity::Advisory }) => {
                    let soft = SoftFailure {
                        index,
                        label: ls.label,
                        last_value: last,
                    };
                    warn!("{dir}: {soft}");
                    soft_failures.push(soft);
                }
                Err(StepError::Timeout { last, severity: Severity::Fatal }) => {
                    error!(
                        "{dir}: step {index} ({}) timed out, last read 0x{last:08x}",
                        ls.label
                    );
                    return Err(RprocError::SequencerStep {
                        index,
                        label: ls.label,
                        reason: format!("poll timed out, last read 0x{last:08x}"),
                    });
                }
            }
        }

        let elapsed = start.elapsed();
        debug!("{dir}: {} done in {elapsed:?}", recipe.name);
        Ok(SequenceReport {
            recipe: recipe.name,
            steps_run: recipe.len(),
            soft_failures,
            elapsed,
        })
    }

    fn exec(&self, step: &Step) -> std::result::Result<(), StepError> {
        match *step {
            Step::Write { bank, offset, value } => {
                self.domain.group(bank).write(offset, value);
            }
            Step::Update {
                bank,
                offset,
                mask,
                value,
            } => {
                self.domain.group(bank).update_bits(offset, mask, value);
            }
            Step::ReadBack { bank, offset } => {
                self.domain.group(bank).read(offset);
            }
            Step::Delay(d) => thread::sleep(d),
            Step::Poll {
                bank,
                offset,
                cond,
                interval,
                timeout,
                severity,
            } => {
                poll(self.domain.group(bank), offset, cond, interval, timeout)
                    .map_err(|last| StepError::Timeout { last, severity })?;
            }
        }
        Ok(())
    }
}

enum StepError {
    Timeout { last: u32, severity: Severity },
}

/// Busy-wait until `cond` holds. Returns the last value read on timeout.
fn poll(
    group: &RegisterGroup,
    offset: u32,
    cond: PollCond,
    interval: Duration,
    timeout: Duration,
) -> std::result::Result<u32, u32> {
    let deadline = Instant::now() + timeout;
    loop {
        let v = group.read(offset);
        if cond.holds(v) {
            return Ok(v);
        }
        if Instant::now() >= deadline {
            return Err(v);
        }
        thread::sleep(interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_conditions() {
        assert!(PollCond::Equals { mask: 0xffff, expect: 0x10 }.holds(0xABCD_0010));
        assert!(!PollCond::Equals { mask: 0xffff, expect: 0x10 }.holds(0x11));
        assert!(PollCond::AnySet(0b100).holds(0b110));
        assert!(PollCond::AllClear(1 << 31).holds(0x1));
        assert!(!PollCond::AllClear(1 << 31).holds(0x8000_0001));
    }

    #[test]
    fn builder_preserves_order() {
        let r = RecipeBuilder::new("t")
            .write("a", Bank::Core, 0, 1)
            .delay("b", Duration::from_micros(1))
            .clear("c", Bank::Rmb, 4, 2)
            .build();
        let labels: Vec<_> = r.steps().iter().map(|s| s.label).collect();
        assert_eq!(labels, ["a", "b", "c"]);
        assert_eq!(r.name(), "t");
    }
}
