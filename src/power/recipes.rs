// CLASSIFICATION: COMMUNITY
// Filename: recipes.rs v0.2
// Author: Lukas Bower
// Date Modified: 2026-10-17

//! Per-family register layouts and the power recipes built from them.

use std::time::Duration;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use super::{Bank, PollCond, Recipe, RecipeBuilder, Severity};

/// Core control block offsets.
pub mod core_regs {
    pub const RST_EVB: u32 = 0x010;
    pub const RESET: u32 = 0x014;
    pub const DBG_CFG: u32 = 0x018;
    pub const GFMUX_CTL: u32 = 0x020;
    pub const PWR_CTL: u32 = 0x030;
    pub const XO_CBCR: u32 = 0x038;
    pub const BHS_STATUS: u32 = 0x078;
    pub const MEM_PWR_CTL: u32 = 0x0B0;
    pub const BOOT_CORE_START: u32 = 0x400;
    pub const BOOT_STATUS: u32 = 0x408;

    /// Debug configuration that halts the core at its first instruction.
    pub const DBG_CFG_BREAK: u32 = 0x2000_0001;
    pub const CBCR_CLK_ENABLE: u32 = 1 << 0;
    pub const CBCR_CLK_OFF: u32 = 1 << 31;
    pub const BHS_EN_REST_ACK: u32 = 1 << 0;
    pub const BOOT_ALIVE: u32 = 1 << 0;
    pub const GFMUX_CLK_ENABLE: u32 = 1 << 1;
}

/// Always-on block offsets.
pub mod rmb_regs {
    pub const SSCAON_CONFIG: u32 = 0x08;
    pub const SSCAON_STATUS: u32 = 0x0C;

    pub const SSCAON_PWR_DOWN_REQ: u32 = 1 << 1;
    pub const SSCAON_ENABLE: u32 = 1 << 13;
    pub const SSCAON_BUS_EN: u32 = 1 << 15;
    pub const SSCAON_BUS_MUX_MASK: u32 = 0x7 << 15;

    pub const STATUS_MASK: u32 = 0xFFFF;
    pub const STATUS_POWERED_DOWN: u32 = 0x400;
    pub const STATUS_BUS_UP: u32 = 0x10;
}

/// Interconnect halt port layout, relative to each port's base.
pub mod halt_regs {
    pub const HALTREQ: u32 = 0x0;
    pub const HALTACK: u32 = 0x4;
    pub const IDLE: u32 = 0x8;

    pub const GLOBAL_CFG0: u32 = 0x1000;
    pub const GLOBAL_CFG0_CLK_MASK: u32 = 0x1F;
    pub const GLOBAL_CFG0_CLK_VALUE: u32 = 0x15;
}

/// Block reset registers; bit 0 asserts the reset.
pub mod reset_regs {
    pub const AON: u32 = 0x0;
    pub const SUBSYS: u32 = 0x4;
    pub const Q6: u32 = 0x8;

    pub const ASSERT: u32 = 1 << 0;
}

bitflags! {
    /// Power island control bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PwrCtl: u32 {
        const L2DATA_STBY_N = 1 << 18;
        const SLP_RET_N = 1 << 19;
        const CLAMP_IO = 1 << 20;
        const CLAMP_WL = 1 << 21;
        const CLAMP_QMC_MEM = 1 << 22;
        const BHS_ON = 1 << 24;
        const LDO_BYP = 1 << 25;
    }
}

bitflags! {
    /// Core reset register bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ResetCtl: u32 {
        const STOP_CORE = 1 << 0;
        const CORE_ARES = 1 << 1;
        const BUS_ARES_ENABLE = 1 << 2;
    }
}

/// Parameters for cores powered through interconnect halt and block resets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HaltResetParams {
    /// Base offsets of the halt ports to drain before power-down.
    pub halt_ports: Vec<u32>,
    #[serde(with = "millis")]
    pub halt_ack_timeout: Duration,
    #[serde(with = "millis")]
    pub aux_timeout: Duration,
    #[serde(with = "micros")]
    pub settle: Duration,
}

impl Default for HaltResetParams {
    fn default() -> Self {
        Self {
            halt_ports: vec![0x0, 0x100],
            halt_ack_timeout: Duration::from_millis(100),
            aux_timeout: Duration::from_secs(1),
            settle: Duration::from_micros(200),
        }
    }
}

/// Parameters for cores with their own power island.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerIslandParams {
    pub mem_banks: u32,
    #[serde(with = "millis")]
    pub clk_timeout: Duration,
    #[serde(with = "millis")]
    pub bhs_timeout: Duration,
    #[serde(with = "millis")]
    pub boot_timeout: Duration,
}

impl Default for PowerIslandParams {
    fn default() -> Self {
        Self {
            mem_banks: 20,
            clk_timeout: Duration::from_millis(100),
            bhs_timeout: Duration::from_millis(100),
            boot_timeout: Duration::from_secs(2),
        }
    }
}

/// Core families and their recipe parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "recipe")]
pub enum Family {
    /// Recipe A: interconnect halt plus block resets.
    #[serde(rename = "recipe-a")]
    HaltReset(HaltResetParams),
    /// Recipe B: staged power island.
    #[serde(rename = "recipe-b")]
    PowerIsland(PowerIslandParams),
}

/// `MEM_PWR_CTL` carries one enable bit per bank.
pub const MAX_MEM_BANKS: u32 = 32;

/// Highest halt port base whose register block still fits the bank.
pub const MAX_HALT_PORT: u32 = u32::MAX - halt_regs::IDLE;

impl Family {
    /// Reject parameters the recipe builders cannot encode.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Family::HaltReset(p) => match p.halt_ports.iter().find(|&&port| port > MAX_HALT_PORT) {
                Some(port) => Err(format!("halt port 0x{port:x} past 0x{MAX_HALT_PORT:x}")),
                None => Ok(()),
            },
            Family::PowerIsland(p) if p.mem_banks > MAX_MEM_BANKS => Err(format!(
                "{} memory banks, at most {MAX_MEM_BANKS}",
                p.mem_banks
            )),
            Family::PowerIsland(_) => Ok(()),
        }
    }

    /// Build the (power-up, power-down) pair. Parameters should have
    /// passed [`Family::validate`]; anything out of range is dropped.
    pub fn recipes(&self) -> (Recipe, Recipe) {
        match self {
            Family::HaltReset(p) => (halt_reset_up(p), halt_reset_down(p)),
            Family::PowerIsland(p) => (power_island_up(p), power_island_down(p)),
        }
    }
}

const POLL_INTERVAL: Duration = Duration::from_micros(100);

fn halt_reset_up(p: &HaltResetParams) -> Recipe {
    use reset_regs::*;
    use rmb_regs::*;

    let mut b = RecipeBuilder::new("halt-reset/up");
    b.set("assert q6 reset", Bank::Reset, Q6, ASSERT)
        .delay("settle", p.settle)
        .clear("release aon reset", Bank::Reset, AON, ASSERT)
        .delay("settle", p.settle)
        .clear("release subsystem reset", Bank::Reset, SUBSYS, ASSERT)
        .delay("settle", p.settle)
        .update(
            "bus clock gating",
            Bank::Halt,
            halt_regs::GLOBAL_CFG0,
            halt_regs::GLOBAL_CFG0_CLK_MASK,
            halt_regs::GLOBAL_CFG0_CLK_VALUE,
        )
        .update(
            "enable aon bus",
            Bank::Rmb,
            SSCAON_CONFIG,
            SSCAON_BUS_MUX_MASK | SSCAON_PWR_DOWN_REQ,
            SSCAON_BUS_EN,
        )
        .poll(
            "wait aon bus up",
            Bank::Rmb,
            SSCAON_STATUS,
            PollCond::Equals {
                mask: STATUS_MASK,
                expect: STATUS_BUS_UP,
            },
            POLL_INTERVAL,
            p.aux_timeout,
            Severity::Fatal,
        )
        .clear("release q6 reset", Bank::Reset, Q6, ASSERT)
        .delay("settle", p.settle)
        .write("boot core", Bank::Core, core_regs::BOOT_CORE_START, 1);
    b.build()
}

fn halt_reset_down(p: &HaltResetParams) -> Recipe {
    use reset_regs::*;
    use rmb_regs::*;

    let mut b = RecipeBuilder::new("halt-reset/down");
    debug_assert!(p.halt_ports.iter().all(|&port| port <= MAX_HALT_PORT));
    for &port in p.halt_ports.iter().filter(|&&port| port <= MAX_HALT_PORT) {
        b.write("halt request", Bank::Halt, port + halt_regs::HALTREQ, 1)
            .poll(
                "halt ack",
                Bank::Halt,
                port + halt_regs::HALTACK,
                PollCond::AnySet(1),
                POLL_INTERVAL,
                p.halt_ack_timeout,
                Severity::Advisory,
            )
            .poll(
                "port idle",
                Bank::Halt,
                port + halt_regs::IDLE,
                PollCond::AnySet(1),
                POLL_INTERVAL,
                Duration::ZERO,
                Severity::Advisory,
            )
            .write("halt release", Bank::Halt, port + halt_regs::HALTREQ, 0);
    }
    b.write("stop core", Bank::Core, core_regs::BOOT_CORE_START, 0)
        .update(
            "aon enable",
            Bank::Rmb,
            SSCAON_CONFIG,
            SSCAON_BUS_MUX_MASK | SSCAON_ENABLE,
            SSCAON_BUS_EN | SSCAON_ENABLE,
        )
        .set("aon power-down request", Bank::Rmb, SSCAON_CONFIG, SSCAON_PWR_DOWN_REQ)
        .poll(
            "wait aon powered down",
            Bank::Rmb,
            SSCAON_STATUS,
            PollCond::Equals {
                mask: STATUS_MASK,
                expect: STATUS_POWERED_DOWN,
            },
            POLL_INTERVAL,
            p.aux_timeout,
            Severity::Fatal,
        )
        .delay("settle", p.settle)
        .set("assert aon reset", Bank::Reset, AON, ASSERT)
        .delay("settle", p.settle)
        .clear(
            "aon disable",
            Bank::Rmb,
            SSCAON_CONFIG,
            SSCAON_ENABLE | SSCAON_PWR_DOWN_REQ,
        )
        .set("assert subsystem reset", Bank::Reset, SUBSYS, ASSERT)
        .set("assert q6 reset", Bank::Reset, Q6, ASSERT)
        .delay("settle", p.settle);
    b.build()
}

fn power_island_up(p: &PowerIslandParams) -> Recipe {
    use core_regs::*;

    let all_resets = ResetCtl::all().bits();
    let mut b = RecipeBuilder::new("power-island/up");
    b.set("assert resets", Bank::Core, RESET, all_resets)
        .set("enable xo clock", Bank::Core, XO_CBCR, CBCR_CLK_ENABLE)
        .poll(
            "wait xo clock",
            Bank::Core,
            XO_CBCR,
            PollCond::AllClear(CBCR_CLK_OFF),
            POLL_INTERVAL,
            p.clk_timeout,
            Severity::Fatal,
        )
        .set("bhs on", Bank::Core, PWR_CTL, PwrCtl::BHS_ON.bits())
        .poll(
            "wait bhs ack",
            Bank::Core,
            BHS_STATUS,
            PollCond::AnySet(BHS_EN_REST_ACK),
            POLL_INTERVAL,
            p.bhs_timeout,
            Severity::Fatal,
        )
        .delay("bhs settle", Duration::from_micros(1))
        .set("ldo bypass", Bank::Core, PWR_CTL, PwrCtl::LDO_BYP.bits())
        .clear(
            "unclamp qmc memory",
            Bank::Core,
            PWR_CTL,
            PwrCtl::CLAMP_QMC_MEM.bits(),
        )
        .set(
            "l2 data and sleep retention",
            Bank::Core,
            PWR_CTL,
            (PwrCtl::L2DATA_STBY_N | PwrCtl::SLP_RET_N).bits(),
        );
    debug_assert!(p.mem_banks <= MAX_MEM_BANKS);
    for bank in (0..p.mem_banks.min(MAX_MEM_BANKS)).rev() {
        b.set("memory bank on", Bank::Core, MEM_PWR_CTL, 1 << bank)
            .read_back("memory bank flush", Bank::Core, MEM_PWR_CTL)
            .delay("memory bank settle", Duration::from_micros(1));
    }
    b.clear("unclamp wl", Bank::Core, PWR_CTL, PwrCtl::CLAMP_WL.bits())
        .clear("unclamp io", Bank::Core, PWR_CTL, PwrCtl::CLAMP_IO.bits())
        .clear("release core reset", Bank::Core, RESET, ResetCtl::CORE_ARES.bits())
        .set("enable core clock", Bank::Core, GFMUX_CTL, GFMUX_CLK_ENABLE)
        .clear("start core", Bank::Core, RESET, ResetCtl::STOP_CORE.bits())
        .poll(
            "wait boot status",
            Bank::Core,
            BOOT_STATUS,
            PollCond::AnySet(BOOT_ALIVE),
            Duration::from_millis(1),
            p.boot_timeout,
            Severity::Fatal,
        );
    b.build()
}

/// Exact reverse of [`power_island_up`]: every register written there is
/// restored to its hardware-reset value.
fn power_island_down(p: &PowerIslandParams) -> Recipe {
    use core_regs::*;

    let mut b = RecipeBuilder::new("power-island/down");
    b.set("stop core", Bank::Core, RESET, ResetCtl::STOP_CORE.bits())
        .clear("disable core clock", Bank::Core, GFMUX_CTL, GFMUX_CLK_ENABLE)
        .set("assert core reset", Bank::Core, RESET, ResetCtl::CORE_ARES.bits())
        .set("clamp io", Bank::Core, PWR_CTL, PwrCtl::CLAMP_IO.bits())
        .set("clamp wl", Bank::Core, PWR_CTL, PwrCtl::CLAMP_WL.bits());
    for bank in 0..p.mem_banks.min(MAX_MEM_BANKS) {
        b.clear("memory bank off", Bank::Core, MEM_PWR_CTL, 1 << bank)
            .read_back("memory bank flush", Bank::Core, MEM_PWR_CTL)
            .delay("memory bank settle", Duration::from_micros(1));
    }
    b.clear(
        "drop l2 data and sleep retention",
        Bank::Core,
        PWR_CTL,
        (PwrCtl::L2DATA_STBY_N | PwrCtl::SLP_RET_N).bits(),
    )
    .set(
        "clamp qmc memory",
        Bank::Core,
        PWR_CTL,
        PwrCtl::CLAMP_QMC_MEM.bits(),
    )
    .clear("ldo off", Bank::Core, PWR_CTL, PwrCtl::LDO_BYP.bits())
    .clear("bhs off", Bank::Core, PWR_CTL, PwrCtl::BHS_ON.bits())
    .poll(
        "wait bhs release",
        Bank::Core,
        BHS_STATUS,
        PollCond::AllClear(BHS_EN_REST_ACK),
        POLL_INTERVAL,
        p.bhs_timeout,
        Severity::Fatal,
    )
    .clear("disable xo clock", Bank::Core, XO_CBCR, CBCR_CLK_ENABLE)
    .poll(
        "wait xo clock off",
        Bank::Core,
        XO_CBCR,
        PollCond::AnySet(CBCR_CLK_OFF),
        POLL_INTERVAL,
        p.clk_timeout,
        Severity::Advisory,
    );
    b.build()
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

mod micros {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_micros() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_micros)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::power::Step;

    #[test]
    fn power_island_touches_every_bank() {
        let (up, down) = Family::PowerIsland(PowerIslandParams::default()).recipes();
        let on = up
            .steps()
            .iter()
            .filter(|s| s.label == "memory bank on")
            .count();
        let off = down
            .steps()
            .iter()
            .filter(|s| s.label == "memory bank off")
            .count();
        assert_eq!(on, 20);
        assert_eq!(off, 20);
    }

    #[test]
    fn halt_ports_are_advisory() {
        let (_, down) = Family::HaltReset(HaltResetParams::default()).recipes();
        let advisory = down
            .steps()
            .iter()
            .filter(|s| {
                matches!(
                    s.step,
                    Step::Poll {
                        severity: Severity::Advisory,
                        ..
                    }
                )
            })
            .count();
        // ack + idle per port
        assert_eq!(advisory, 4);
    }

    #[test]
    fn validate_bounds_bank_count() {
        let mut p = PowerIslandParams::default();
        p.mem_banks = MAX_MEM_BANKS;
        assert!(Family::PowerIsland(p.clone()).validate().is_ok());
        let (up, _) = Family::PowerIsland(p.clone()).recipes();
        assert!(up.steps().iter().any(|s| matches!(
            s.step,
            Step::Update { value, .. } if value == 1 << 31
        )));
        p.mem_banks = 40;
        assert!(Family::PowerIsland(p).validate().is_err());
    }

    #[test]
    fn validate_bounds_halt_ports() {
        let mut p = HaltResetParams::default();
        p.halt_ports = vec![0, MAX_HALT_PORT];
        assert!(Family::HaltReset(p.clone()).validate().is_ok());
        p.halt_ports.push(u32::MAX - 2);
        assert!(Family::HaltReset(p).validate().is_err());
    }

    #[test]
    fn up_recipe_ends_with_boot_trigger() {
        let (up, _) = Family::HaltReset(HaltResetParams::default()).recipes();
        let last = up.steps().last().map(|s| s.label);
        assert_eq!(last, Some("boot core"));
    }
}
