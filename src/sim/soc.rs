// CLASSIFICATION: COMMUNITY
// Filename: soc.rs v0.3
// Author: Lukas Bower
// Date Modified: 2026-10-17

//! Simulated system-on-chip around one or more remote cores.
//!
//! [`SimCore`] plays the firmware: it watches the register and signal banks
//! and answers on the controller's interrupt lines after configurable delays.
//! [`SimSoc`] wires banks, models, memory and the trusted service into ready
//! to use controllers from a [`CoreConfig`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread;
use std::time::Duration;

use log::debug;

use super::bank::SimRegisterBank;
use super::memory::SimMemory;
use super::trusted::{ImageSigner, SimTrustedService};
use crate::config::{CoreConfig, SignalBits};
use crate::controller::{BootMethod, LifecycleController};
use crate::crash::CrashReasonSource;
use crate::error::Result;
use crate::firmware::{FirmwareImage, Segment};
use crate::hal::{EventChannel, EventKind, RegisterGroup, SignalGroup};
use crate::power::recipes::{core_regs, halt_regs, reset_regs, rmb_regs, PwrCtl, ResetCtl};
use crate::power::{Family, PowerDomain, PowerSequencer};
use crate::remote::RemoteCore;
use crate::trusted::TrustedLoader;

const ALL_EVENTS: [EventKind; 6] = [
    EventKind::Ready,
    EventKind::Handover,
    EventKind::Watchdog,
    EventKind::Fatal,
    EventKind::StopAck,
    EventKind::SpawnAck,
];

fn relock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// How the simulated firmware answers. `None` withholds the answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimBehavior {
    pub ready_after: Option<Duration>,
    pub handover_with_ready: bool,
    pub stop_ack_after: Option<Duration>,
    /// Acknowledge stop on the watchdog line instead of stop-ack.
    pub stop_ack_via_watchdog: bool,
    pub spawn_ack_after: Option<Duration>,
}

impl Default for SimBehavior {
    fn default() -> Self {
        Self {
            ready_after: Some(Duration::from_millis(10)),
            handover_with_ready: true,
            stop_ack_after: Some(Duration::from_millis(10)),
            stop_ack_via_watchdog: false,
            spawn_ack_after: Some(Duration::from_millis(10)),
        }
    }
}

/// Firmware stand-in for one core.
pub struct SimCore {
    name: String,
    behavior: Mutex<SimBehavior>,
    channels: Mutex<HashMap<EventKind, Arc<EventChannel>>>,
    booted: AtomicBool,
    boots: AtomicU32,
    me: Weak<SimCore>,
}

impl SimCore {
    pub fn new(name: impl Into<String>, behavior: SimBehavior) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            name: name.into(),
            behavior: Mutex::new(behavior),
            channels: Mutex::new(HashMap::new()),
            booted: AtomicBool::new(false),
            boots: AtomicU32::new(0),
            me: me.clone(),
        })
    }

    /// Connect to the controller's interrupt lines.
    pub fn attach(&self, ctl: &LifecycleController) {
        let mut channels = relock(&self.channels);
        for kind in ALL_EVENTS {
            channels.insert(kind, ctl.channel(kind));
        }
    }

    pub fn behavior(&self) -> SimBehavior {
        relock(&self.behavior).clone()
    }

    pub fn set_behavior(&self, behavior: SimBehavior) {
        *relock(&self.behavior) = behavior;
    }

    pub fn is_booted(&self) -> bool {
        self.booted.load(Ordering::SeqCst)
    }

    pub fn boot_count(&self) -> u32 {
        self.boots.load(Ordering::SeqCst)
    }

    /// Raise an interrupt line now. Returns whether the edge was delivered.
    pub fn fire(&self, kind: EventKind) -> bool {
        let ch = relock(&self.channels).get(&kind).cloned();
        match ch {
            Some(ch) => ch.fire(),
            None => false,
        }
    }

    /// Firmware dies: the core stops executing and raises `line`.
    pub fn crash(&self, line: EventKind) -> bool {
        self.halt();
        self.fire(line)
    }

    /// Raise `kinds` in order once `delay` has passed.
    pub fn fire_after(&self, delay: Duration, kinds: Vec<EventKind>) {
        let me = self.me.clone();
        thread::spawn(move || {
            thread::sleep(delay);
            if let Some(core) = me.upgrade() {
                for kind in kinds {
                    core.fire(kind);
                }
            }
        });
    }

    /// The boot trigger reached the core.
    pub fn boot(&self) {
        self.boot_after(Duration::ZERO);
    }

    fn boot_after(&self, lead: Duration) {
        if self.booted.swap(true, Ordering::SeqCst) {
            return;
        }
        self.boots.fetch_add(1, Ordering::SeqCst);
        let b = self.behavior();
        match b.ready_after {
            Some(d) => {
                let mut kinds = Vec::new();
                if b.handover_with_ready {
                    kinds.push(EventKind::Handover);
                }
                kinds.push(EventKind::Ready);
                self.fire_after(lead + d, kinds);
            }
            None => debug!("sim {}: booted, withholding ready", self.name),
        }
    }

    pub fn halt(&self) {
        if self.booted.swap(false, Ordering::SeqCst) {
            debug!("sim {}: halted", self.name);
        }
    }

    fn on_stop_request(&self) {
        self.halt();
        let b = self.behavior();
        if let Some(d) = b.stop_ack_after {
            let kind = if b.stop_ack_via_watchdog {
                EventKind::Watchdog
            } else {
                EventKind::StopAck
            };
            self.fire_after(d, vec![kind]);
        }
    }

    fn on_spawn_request(&self) {
        if let Some(d) = self.behavior().spawn_ack_after {
            self.fire_after(d, vec![EventKind::SpawnAck]);
            self.boot_after(d);
        }
    }

    /// Treat boot-status and boot-start writes on `bank` as the boot trigger.
    pub fn watch_core_regs(&self, bank: &SimRegisterBank) {
        let me = self.me.clone();
        bank.add_listener(Box::new(move |bank: &SimRegisterBank, off: u32, _: u32| {
            let Some(core) = me.upgrade() else { return };
            let alive = bank.peek(core_regs::BOOT_STATUS) & core_regs::BOOT_ALIVE != 0
                || bank.peek(core_regs::BOOT_CORE_START) & 1 != 0;
            if alive {
                core.boot();
            } else if off == core_regs::RESET || off == core_regs::BOOT_CORE_START {
                core.halt();
            }
        }));
    }

    /// React to rising stop/spawn bits in the signal word at `offset`.
    pub fn watch_signals(&self, bank: &SimRegisterBank, offset: u32, bits: SignalBits) {
        let me = self.me.clone();
        let last = AtomicU32::new(bank.peek(offset));
        bank.add_listener(Box::new(move |_: &SimRegisterBank, off: u32, val: u32| {
            if off != offset {
                return;
            }
            let rising = val & !last.swap(val, Ordering::SeqCst);
            let Some(core) = me.upgrade() else { return };
            if rising & (1 << bits.stop) != 0 {
                core.on_stop_request();
            }
            if rising & (1 << bits.spawn) != 0 {
                core.on_spawn_request();
            }
        }));
    }
}

/// Status bits of the power island follow its control bits.
pub fn install_power_island_model(bank: &SimRegisterBank) {
    use core_regs::*;

    bank.poke(RESET, ResetCtl::all().bits());
    bank.poke(
        PWR_CTL,
        (PwrCtl::CLAMP_IO | PwrCtl::CLAMP_WL | PwrCtl::CLAMP_QMC_MEM).bits(),
    );
    bank.poke(XO_CBCR, CBCR_CLK_OFF);
    bank.add_model(Box::new(|regs: &mut HashMap<u32, u32>, off: u32, _: u32| {
        let get = |regs: &HashMap<u32, u32>, o: u32| regs.get(&o).copied().unwrap_or(0);
        match off {
            XO_CBCR => {
                let v = get(regs, XO_CBCR);
                let v = if v & CBCR_CLK_ENABLE != 0 {
                    v & !CBCR_CLK_OFF
                } else {
                    v | CBCR_CLK_OFF
                };
                regs.insert(XO_CBCR, v);
            }
            PWR_CTL => {
                let on = get(regs, PWR_CTL) & PwrCtl::BHS_ON.bits() != 0;
                regs.insert(BHS_STATUS, if on { BHS_EN_REST_ACK } else { 0 });
            }
            RESET | GFMUX_CTL => {
                let held = ResetCtl::STOP_CORE | ResetCtl::CORE_ARES;
                let alive = get(regs, RESET) & held.bits() == 0
                    && get(regs, GFMUX_CTL) & GFMUX_CLK_ENABLE != 0;
                regs.insert(BOOT_STATUS, if alive { BOOT_ALIVE } else { 0 });
            }
            _ => {}
        }
    }));
}

/// Halt ports acknowledge and go idle as soon as a halt is requested.
pub fn install_halt_model(bank: &SimRegisterBank, ports: Vec<u32>) {
    bank.add_model(Box::new(move |regs: &mut HashMap<u32, u32>, off: u32, val: u32| {
        if ports.iter().any(|&p| p + halt_regs::HALTREQ == off) {
            let port = off - halt_regs::HALTREQ;
            regs.insert(port + halt_regs::HALTACK, val & 1);
            regs.insert(port + halt_regs::IDLE, val & 1);
        }
    }));
}

/// Always-on block reports bus-up or powered-down after a config write.
pub fn install_aon_model(bank: &SimRegisterBank) {
    use rmb_regs::*;

    bank.add_model(Box::new(|regs: &mut HashMap<u32, u32>, off: u32, val: u32| {
        if off != SSCAON_CONFIG {
            return;
        }
        let status = if val & SSCAON_PWR_DOWN_REQ != 0 {
            STATUS_POWERED_DOWN
        } else if val & SSCAON_BUS_EN != 0 {
            STATUS_BUS_UP
        } else {
            0
        };
        regs.insert(SSCAON_STATUS, status);
    }));
}

/// Block resets come out of power-on asserted.
pub fn install_reset_defaults(bank: &SimRegisterBank) {
    for r in [reset_regs::AON, reset_regs::SUBSYS, reset_regs::Q6] {
        bank.poke(r, reset_regs::ASSERT);
    }
}

/// Crash-reason item the test or simulator can fill in.
#[derive(Debug, Default)]
pub struct SimCrashReason {
    reason: Mutex<Option<Vec<u8>>>,
}

impl SimCrashReason {
    pub fn set(&self, text: &str) {
        let mut raw = text.as_bytes().to_vec();
        raw.resize(raw.len() + 8, 0);
        *relock(&self.reason) = Some(raw);
    }

    pub fn clear(&self) {
        *relock(&self.reason) = None;
    }
}

impl CrashReasonSource for SimCrashReason {
    fn read_reason(&self) -> Option<Vec<u8>> {
        relock(&self.reason).clone()
    }
}

/// Everything built for one simulated core.
pub struct SimHandle {
    pub controller: Arc<LifecycleController>,
    pub sim: Arc<SimCore>,
    pub core_bank: Arc<SimRegisterBank>,
    pub rmb_bank: Arc<SimRegisterBank>,
    pub signals: Arc<SimRegisterBank>,
    pub memory: Arc<SimMemory>,
    pub crash_reason: Arc<SimCrashReason>,
}

/// Shared interconnect, resets and trusted service for a set of cores.
pub struct SimSoc {
    pub halt: Arc<SimRegisterBank>,
    pub resets: Arc<SimRegisterBank>,
    halt_group: RegisterGroup,
    reset_group: RegisterGroup,
    tee: Arc<SimTrustedService>,
    signer: ImageSigner,
}

impl Default for SimSoc {
    fn default() -> Self {
        Self::new()
    }
}

impl SimSoc {
    pub fn new() -> Self {
        let signer = ImageSigner::from_seed(&[0x5A; 32]);
        let halt = Arc::new(SimRegisterBank::new("tcsr"));
        let resets = Arc::new(SimRegisterBank::new("gcc"));
        install_reset_defaults(&resets);
        Self {
            halt_group: RegisterGroup::new("tcsr", halt.clone()),
            reset_group: RegisterGroup::new("gcc", resets.clone()),
            halt,
            resets,
            tee: Arc::new(SimTrustedService::with_key(signer.verifying_key())),
            signer,
        }
    }

    pub fn tee(&self) -> &Arc<SimTrustedService> {
        &self.tee
    }

    pub fn signer(&self) -> &ImageSigner {
        &self.signer
    }

    /// Build a controller for `cfg`; children pass their parent's controller.
    pub fn build_core(
        &self,
        cfg: &CoreConfig,
        parent: Option<&Arc<LifecycleController>>,
        behavior: SimBehavior,
    ) -> Result<SimHandle> {
        let memory = Arc::new(SimMemory::new(cfg.memory));
        let core = match parent {
            Some(p) => RemoteCore::new_child(p.core(), &cfg.name, &cfg.firmware, cfg.memory, memory.clone()),
            None => RemoteCore::new(&cfg.name, &cfg.firmware, cfg.memory, memory.clone()),
        };

        let core_bank = Arc::new(SimRegisterBank::new("q6ss"));
        install_power_island_model(&core_bank);
        let rmb_bank = Arc::new(SimRegisterBank::new("rmb"));
        install_aon_model(&rmb_bank);
        let signals = Arc::new(SimRegisterBank::new("smp2p"));

        let sim = SimCore::new(cfg.name.clone(), behavior);
        sim.watch_core_regs(&core_bank);
        sim.watch_signals(&signals, 0, cfg.signals);

        let signal_group = SignalGroup::new(RegisterGroup::new("smp2p", signals.clone()), 0);
        let crash_reason = Arc::new(SimCrashReason::default());
        let mut builder = LifecycleController::builder(core, cfg.boot.clone())
            .stop_doorbell(signal_group.doorbell("stop", cfg.signals.stop))
            .crash_reason(crash_reason.clone())
            .requires_force_stop(cfg.requires_force_stop);
        if cfg.is_child() {
            builder = builder.spawn_doorbell(signal_group.doorbell("spawn", cfg.signals.spawn));
        }
        if let Some(family) = &cfg.family {
            if let Family::HaltReset(p) = family {
                install_halt_model(&self.halt, p.halt_ports.clone());
            }
            let domain = PowerDomain {
                core: RegisterGroup::new("q6ss", core_bank.clone()),
                rmb: RegisterGroup::new("rmb", rmb_bank.clone()),
                halt: self.halt_group.clone(),
                reset: self.reset_group.clone(),
            };
            builder = builder.sequencer(Arc::new(PowerSequencer::new(family.clone(), domain)));
        }
        if let BootMethod::Trusted { peripheral_id, .. } = cfg.boot {
            self.tee.attach(peripheral_id, Arc::downgrade(&sim));
            builder = builder.trusted(TrustedLoader::new(self.tee.clone()));
        }

        let controller = Arc::new(builder.build()?);
        sim.attach(&controller);
        Ok(SimHandle {
            controller,
            sim,
            core_bank,
            rmb_bank,
            signals,
            memory,
            crash_reason,
        })
    }

    /// A small signed image that fits `cfg`'s memory region: a text segment
    /// followed by a zero-filled one.
    pub fn image_for(&self, cfg: &CoreConfig) -> FirmwareImage {
        let base = cfg.memory.reloc;
        let text_len = (cfg.memory.size / 2).min(0x100);
        let bss_len = (cfg.memory.size - text_len).min(0x100);
        let text: Vec<u8> = cfg.name.bytes().cycle().take(text_len as usize).collect();
        let image = FirmwareImage::new(
            cfg.firmware.clone(),
            base,
            vec![
                Segment::bytes(base, text),
                Segment::zeroed(base + text_len, bss_len),
            ],
        );
        self.signer.sign(image)
    }
}
