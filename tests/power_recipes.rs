// CLASSIFICATION: COMMUNITY
// Filename: power_recipes.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-17

mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rproc_ctl::error::RprocError;
use rproc_ctl::hal::RegisterGroup;
use rproc_ctl::power::recipes::{core_regs, halt_regs, rmb_regs};
use rproc_ctl::power::{Family, HaltResetParams, PowerDomain, PowerIslandParams, PowerSequencer};
use rproc_ctl::sim::soc::{install_aon_model, install_power_island_model, install_reset_defaults};
use rproc_ctl::sim::{SimBehavior, SimRegisterBank, SimSoc};
use rproc_ctl::State;
use serial_test::serial;

use common::{core_cfg, init_logging};

struct Banks {
    core: Arc<SimRegisterBank>,
    rmb: Arc<SimRegisterBank>,
    halt: Arc<SimRegisterBank>,
    reset: Arc<SimRegisterBank>,
}

impl Banks {
    fn new() -> Self {
        Self {
            core: Arc::new(SimRegisterBank::new("q6ss")),
            rmb: Arc::new(SimRegisterBank::new("rmb")),
            halt: Arc::new(SimRegisterBank::new("tcsr")),
            reset: Arc::new(SimRegisterBank::new("gcc")),
        }
    }

    fn domain(&self) -> PowerDomain {
        PowerDomain {
            core: RegisterGroup::new("q6ss", self.core.clone()),
            rmb: RegisterGroup::new("rmb", self.rmb.clone()),
            halt: RegisterGroup::new("tcsr", self.halt.clone()),
            reset: RegisterGroup::new("gcc", self.reset.clone()),
        }
    }
}

fn touched(bank: &SimRegisterBank, before: &HashMap<u32, u32>) -> Vec<(u32, u32, u32)> {
    bank.written_offsets()
        .into_iter()
        .map(|off| (off, before.get(&off).copied().unwrap_or(0), bank.peek(off)))
        .filter(|(_, was, now)| was != now)
        .collect()
}

#[test]
#[serial]
fn power_island_round_trip_restores_registers() {
    init_logging();
    let banks = Banks::new();
    install_power_island_model(&banks.core);
    let before = banks.core.snapshot();

    let seq = PowerSequencer::new(
        Family::PowerIsland(PowerIslandParams::default()),
        banks.domain(),
    );
    let up = seq.power_up().unwrap();
    assert!(up.soft_failures.is_empty());
    assert_eq!(banks.core.peek(core_regs::BOOT_STATUS), core_regs::BOOT_ALIVE);
    assert_eq!(banks.core.peek(core_regs::MEM_PWR_CTL), (1 << 20) - 1);

    let down = seq.power_down().unwrap();
    assert!(down.soft_failures.is_empty());
    assert!(banks.core.written_offsets().len() > 5);
    let changed = touched(&banks.core, &before);
    assert!(changed.is_empty(), "registers not restored: {changed:x?}");
}

#[test]
#[serial]
fn power_island_turns_memory_banks_on_one_at_a_time() {
    init_logging();
    let banks = Banks::new();
    install_power_island_model(&banks.core);
    let params = PowerIslandParams {
        mem_banks: 4,
        ..PowerIslandParams::default()
    };
    let seq = PowerSequencer::new(Family::PowerIsland(params), banks.domain());
    seq.power_up().unwrap();

    let mem: Vec<u32> = banks
        .core
        .writes()
        .into_iter()
        .filter(|(off, _)| *off == core_regs::MEM_PWR_CTL)
        .map(|(_, v)| v)
        .collect();
    assert_eq!(mem, vec![0b1000, 0b1100, 0b1110, 0b1111]);
}

#[test]
#[serial]
fn halt_timeouts_are_advisory() {
    init_logging();
    let banks = Banks::new();
    install_aon_model(&banks.rmb);
    install_reset_defaults(&banks.reset);
    let params = HaltResetParams {
        halt_ack_timeout: Duration::from_millis(20),
        ..HaltResetParams::default()
    };
    let seq = PowerSequencer::new(Family::HaltReset(params), banks.domain());

    // No halt model: ports never acknowledge.
    let report = seq.power_down().unwrap();
    let labels: Vec<&str> = report.soft_failures.iter().map(|s| s.label).collect();
    assert_eq!(labels, vec!["halt ack", "port idle", "halt ack", "port idle"]);
    assert_eq!(report.steps_run, seq.recipe(rproc_ctl::Direction::Down).len());
    assert!(banks
        .rmb
        .writes()
        .iter()
        .any(|(off, v)| *off == rmb_regs::SSCAON_CONFIG && v & rmb_regs::SSCAON_PWR_DOWN_REQ != 0));
    assert_eq!(banks.halt.peek(halt_regs::HALTREQ), 0);
    assert_eq!(banks.halt.peek(0x100 + halt_regs::HALTREQ), 0);
}

#[test]
#[serial]
fn aux_status_timeout_is_fatal() {
    init_logging();
    let banks = Banks::new();
    let params = HaltResetParams {
        aux_timeout: Duration::from_millis(20),
        ..HaltResetParams::default()
    };
    let seq = PowerSequencer::new(Family::HaltReset(params), banks.domain());

    // No always-on model: the bus never reports up.
    match seq.power_up() {
        Err(RprocError::SequencerStep { label, .. }) => assert_eq!(label, "wait aon bus up"),
        other => panic!("expected step failure, got {other:?}"),
    }
    assert_eq!(banks.core.peek(core_regs::BOOT_CORE_START), 0);
}

#[test]
#[serial]
fn sequencer_boot_programs_physical_boot_vector() {
    init_logging();
    let soc = SimSoc::new();
    let cfg = core_cfg("cdsp");
    let h = soc.build_core(&cfg, None, SimBehavior::default()).unwrap();
    let ctl = &h.controller;

    ctl.prepare().unwrap();
    ctl.start(soc.image_for(&cfg), Duration::from_secs(3)).unwrap();
    assert_eq!(ctl.state(), State::Running);
    assert_eq!(h.core_bank.peek(core_regs::RST_EVB), 0x8B00_0000 >> 4);

    let mut text = [0u8; 4];
    rproc_ctl::RemoteMemory::read(&*h.memory, 0, &mut text).unwrap();
    assert_eq!(&text, b"cdsp");

    let pending = ctl.shutdown(Duration::from_secs(1)).unwrap();
    assert!(!pending);
    assert!(!h.sim.is_booted());
    assert_eq!(h.core_bank.peek(core_regs::BOOT_STATUS), 0);
}

#[test]
#[serial]
fn debug_break_is_cleared_after_boot() {
    init_logging();
    let soc = SimSoc::new();
    let mut cfg = core_cfg("cdsp");
    cfg.boot = rproc_ctl::BootMethod::Sequencer { debug_break: true };
    let h = soc.build_core(&cfg, None, SimBehavior::default()).unwrap();

    h.controller.prepare().unwrap();
    h.controller
        .start(soc.image_for(&cfg), Duration::from_secs(3))
        .unwrap();
    assert!(h
        .core_bank
        .writes()
        .contains(&(core_regs::DBG_CFG, core_regs::DBG_CFG_BREAK)));
    assert_eq!(h.core_bank.peek(core_regs::DBG_CFG), 0);
}

#[test]
#[serial]
fn halt_reset_core_boots_and_drains_ports() {
    init_logging();
    let soc = SimSoc::new();
    let cfg = core_cfg("wcss");
    let h = soc.build_core(&cfg, None, SimBehavior::default()).unwrap();
    let ctl = &h.controller;

    ctl.prepare().unwrap();
    ctl.start(soc.image_for(&cfg), Duration::from_secs(1)).unwrap();
    assert_eq!(h.core_bank.peek(core_regs::BOOT_CORE_START), 1);
    assert!(h.sim.is_booted());

    ctl.shutdown(Duration::from_secs(1)).unwrap();
    assert!(!h.sim.is_booted());
    for port in [0x0, 0x100] {
        assert!(soc
            .halt
            .writes()
            .contains(&(port + halt_regs::HALTREQ, 1)));
    }
}

#[test]
#[serial]
fn fatal_power_up_step_leaves_core_booting() {
    init_logging();
    let soc = SimSoc::new();
    let cfg = core_cfg("wcss");
    let h = soc.build_core(&cfg, None, SimBehavior::default()).unwrap();
    // The always-on block never reports its bus up.
    h.rmb_bank.add_model(Box::new(
        |regs: &mut HashMap<u32, u32>, off: u32, _: u32| {
            if off == rmb_regs::SSCAON_CONFIG {
                regs.insert(rmb_regs::SSCAON_STATUS, 0);
            }
        },
    ));
    let ctl = &h.controller;

    ctl.prepare().unwrap();
    let err = ctl
        .start(soc.image_for(&cfg), Duration::from_secs(1))
        .unwrap_err();
    match err {
        RprocError::SequencerStep { label, .. } => assert_eq!(label, "wait aon bus up"),
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(ctl.state(), State::Booting);
    assert!(!ctl.is_running());
    assert_eq!(h.core_bank.peek(core_regs::BOOT_CORE_START), 0);
    assert!(!h.sim.is_booted());
}
