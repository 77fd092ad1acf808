// CLASSIFICATION: COMMUNITY
// Filename: controller.rs v0.4
// Author: Lukas Bower
// Date Modified: 2026-10-17

//! Lifecycle state machine for one remote core.
//!
//! ```text
//! Unprepared -> Prepared -> Booting -> Running -> Stopping -> Prepared
//!                              \           \
//!                               +-----------+--> Crashed (until re-prepared)
//! ```
//!
//! The supervisor drives the controller from one thread. Interrupt lines post
//! [`CoreEvent`]s to a queue that a dedicated pump thread drains, applying
//! each event under the same lock the supervisor uses. Callbacks (crash,
//! handover) always run with that lock released.

use std::fmt;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use crate::crash::{CrashCallback, CrashKind, CrashReasonSource, CrashReporter};
use crate::error::{Result, RprocError};
use crate::firmware::{self, FirmwareImage};
use crate::hal::irq::PumpMessage;
use crate::hal::{CoreEvent, Doorbell, EventChannel, EventKind};
use crate::power::recipes::core_regs;
use crate::power::PowerSequencer;
use crate::remote::RemoteCore;
use crate::trusted::TrustedLoader;

/// Lifecycle state of a remote core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    Unprepared,
    Prepared,
    Booting,
    Running,
    Stopping,
    Crashed,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            State::Unprepared => "unprepared",
            State::Prepared => "prepared",
            State::Booting => "booting",
            State::Running => "running",
            State::Stopping => "stopping",
            State::Crashed => "crashed",
        };
        f.write_str(s)
    }
}

/// How `start()` gets firmware running on the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "kebab-case")]
pub enum BootMethod {
    /// Authenticated load and reset through the trusted service.
    Trusted {
        peripheral_id: u32,
        reset_cmd_id: u32,
        #[serde(default)]
        debug_break: bool,
    },
    /// Load segments, program the boot vector, run the power-up recipe.
    Sequencer {
        #[serde(default)]
        debug_break: bool,
    },
    /// Child partition: load segments and ask the parent's firmware to
    /// spawn it.
    Spawn,
}

pub type HandoverCallback = Box<dyn Fn() + Send + Sync>;

#[derive(Debug)]
struct Inner {
    state: State,
    running: bool,
    handover_issued: bool,
    ready: bool,
    stop_acked: bool,
    spawn_acked: bool,
    crash: Option<CrashKind>,
}

/// State shared with the pump thread.
struct Shared {
    name: String,
    inner: Mutex<Inner>,
    cond: Condvar,
    reporter: CrashReporter,
    handover: Mutex<Option<Arc<dyn Fn() + Send + Sync>>>,
}

impl Shared {
    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        Ok(self.inner.lock()?)
    }

    fn wait_while<F>(&self, timeout: Duration, cond: F) -> Result<MutexGuard<'_, Inner>>
    where
        F: FnMut(&mut Inner) -> bool,
    {
        let guard = self.lock()?;
        let (guard, _) = self.cond.wait_timeout_while(guard, timeout, cond)?;
        Ok(guard)
    }

    fn apply(&self, ev: CoreEvent) {
        debug!("{}: irq {} #{}", self.name, ev.kind, ev.seq);
        match ev.kind {
            EventKind::Ready => self.flag(|i| i.ready = true),
            EventKind::StopAck => self.flag(|i| i.stop_acked = true),
            EventKind::SpawnAck => self.flag(|i| i.spawn_acked = true),
            EventKind::Handover => self.handover(),
            EventKind::Fatal => self.crash(CrashKind::FatalError),
            EventKind::Watchdog => {
                let running = match self.inner.lock() {
                    Ok(mut inner) => {
                        if !inner.running {
                            inner.stop_acked = true;
                        }
                        inner.running
                    }
                    Err(_) => {
                        error!("{}: controller lock poisoned, watchdog dropped", self.name);
                        return;
                    }
                };
                if running {
                    self.crash(CrashKind::Watchdog);
                } else {
                    debug!("{}: watchdog while stopped, treated as stop-ack", self.name);
                    self.cond.notify_all();
                }
            }
        }
    }

    fn flag(&self, set: impl FnOnce(&mut Inner)) {
        match self.inner.lock() {
            Ok(mut inner) => set(&mut *inner),
            Err(_) => {
                error!("{}: controller lock poisoned, event dropped", self.name);
                return;
            }
        }
        self.cond.notify_all();
    }

    fn handover(&self) {
        match self.inner.lock() {
            Ok(inner) if inner.handover_issued => {
                debug!("{}: duplicate handover ignored", self.name);
                return;
            }
            Ok(mut inner) => inner.handover_issued = true,
            Err(_) => {
                error!("{}: controller lock poisoned, handover dropped", self.name);
                return;
            }
        }
        info!("{}: handover, releasing proxy resources", self.name);
        let cb = self
            .handover
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(cb) = cb {
            cb();
        }
    }

    fn crash(&self, kind: CrashKind) {
        let report = match self.inner.lock() {
            Ok(mut inner) => {
                if inner.state == State::Crashed {
                    debug!("{}: {kind} while already crashed, ignored", self.name);
                    return;
                }
                inner.running = false;
                inner.state = State::Crashed;
                inner.crash = Some(kind);
                self.reporter.capture(kind)
            }
            Err(_) => {
                error!("{}: controller lock poisoned, {kind} dropped", self.name);
                return;
            }
        };
        self.cond.notify_all();
        self.reporter.deliver(&report);
    }
}

/// Reset-vector register value for a physical entry point.
fn boot_vector(entry: u64) -> Result<u32> {
    u32::try_from(entry >> 4)
        .map_err(|_| RprocError::Load(format!("entry 0x{entry:x} beyond the boot vector range")))
}

fn run_pump(shared: Arc<Shared>, rx: Receiver<PumpMessage>) {
    while let Ok(msg) = rx.recv() {
        match msg {
            PumpMessage::Event(ev) => shared.apply(ev),
            PumpMessage::Shutdown => break,
        }
    }
    debug!("{}: event pump stopped", shared.name);
}

struct Channels {
    ready: Arc<EventChannel>,
    handover: Arc<EventChannel>,
    watchdog: Arc<EventChannel>,
    fatal: Arc<EventChannel>,
    stop_ack: Arc<EventChannel>,
    spawn_ack: Arc<EventChannel>,
}

impl Channels {
    fn new(tx: &Sender<PumpMessage>) -> Self {
        let ch = |kind, enabled| Arc::new(EventChannel::new(kind, enabled, tx.clone()));
        Self {
            ready: ch(EventKind::Ready, true),
            // Enabled by prepare() so an early edge cannot release resources.
            handover: ch(EventKind::Handover, false),
            watchdog: ch(EventKind::Watchdog, true),
            fatal: ch(EventKind::Fatal, true),
            stop_ack: ch(EventKind::StopAck, true),
            spawn_ack: ch(EventKind::SpawnAck, true),
        }
    }

    fn get(&self, kind: EventKind) -> &Arc<EventChannel> {
        match kind {
            EventKind::Ready => &self.ready,
            EventKind::Handover => &self.handover,
            EventKind::Watchdog => &self.watchdog,
            EventKind::Fatal => &self.fatal,
            EventKind::StopAck => &self.stop_ack,
            EventKind::SpawnAck => &self.spawn_ack,
        }
    }
}

/// Collects a controller's collaborators before it starts its pump thread.
pub struct ControllerBuilder {
    core: Arc<RemoteCore>,
    boot: BootMethod,
    sequencer: Option<Arc<PowerSequencer>>,
    trusted: Option<TrustedLoader>,
    stop_bell: Option<Doorbell>,
    spawn_bell: Option<Doorbell>,
    crash_reason: Option<Arc<dyn CrashReasonSource>>,
    requires_force_stop: bool,
}

impl ControllerBuilder {
    pub fn sequencer(mut self, sequencer: Arc<PowerSequencer>) -> Self {
        self.sequencer = Some(sequencer);
        self
    }

    pub fn trusted(mut self, loader: TrustedLoader) -> Self {
        self.trusted = Some(loader);
        self
    }

    pub fn stop_doorbell(mut self, bell: Doorbell) -> Self {
        self.stop_bell = Some(bell);
        self
    }

    pub fn spawn_doorbell(mut self, bell: Doorbell) -> Self {
        self.spawn_bell = Some(bell);
        self
    }

    pub fn crash_reason(mut self, source: Arc<dyn CrashReasonSource>) -> Self {
        self.crash_reason = Some(source);
        self
    }

    /// Ask the firmware to stop gracefully before powering down.
    pub fn requires_force_stop(mut self, yes: bool) -> Self {
        self.requires_force_stop = yes;
        self
    }

    pub fn build(self) -> Result<LifecycleController> {
        let name = self.core.name().to_owned();
        match &self.boot {
            BootMethod::Trusted { .. } if self.trusted.is_none() => {
                return Err(RprocError::ResourceUnavailable(format!(
                    "{name}: trusted boot without a trusted service"
                )));
            }
            BootMethod::Sequencer { .. } if self.sequencer.is_none() => {
                return Err(RprocError::ResourceUnavailable(format!(
                    "{name}: sequencer boot without a power sequencer"
                )));
            }
            BootMethod::Spawn if !self.core.is_child() => return Err(RprocError::NotChild),
            BootMethod::Spawn if self.spawn_bell.is_none() => {
                return Err(RprocError::ResourceUnavailable(format!(
                    "{name}: spawn boot without a spawn doorbell"
                )));
            }
            _ => {}
        }

        let (tx, rx) = channel();
        let shared = Arc::new(Shared {
            name: name.clone(),
            inner: Mutex::new(Inner {
                state: State::Unprepared,
                running: false,
                handover_issued: false,
                ready: false,
                stop_acked: false,
                spawn_acked: false,
                crash: None,
            }),
            cond: Condvar::new(),
            reporter: CrashReporter::new(name.clone(), self.crash_reason),
            handover: Mutex::new(None),
        });
        let channels = Channels::new(&tx);
        let pump_shared = shared.clone();
        let pump = thread::Builder::new()
            .name(format!("rproc-{name}"))
            .spawn(move || run_pump(pump_shared, rx))
            .map_err(|e| RprocError::ResourceUnavailable(format!("{name}: event pump: {e}")))?;

        info!("{name}: controller ready ({:?})", self.boot);
        Ok(LifecycleController {
            core: self.core,
            boot: self.boot,
            sequencer: self.sequencer,
            trusted: self.trusted,
            stop_bell: self.stop_bell,
            spawn_bell: self.spawn_bell,
            requires_force_stop: self.requires_force_stop,
            shared,
            channels,
            queue: tx,
            pump: Some(pump),
        })
    }
}

/// Owns one remote core's interrupt lines, doorbells and boot path.
pub struct LifecycleController {
    core: Arc<RemoteCore>,
    boot: BootMethod,
    sequencer: Option<Arc<PowerSequencer>>,
    trusted: Option<TrustedLoader>,
    stop_bell: Option<Doorbell>,
    spawn_bell: Option<Doorbell>,
    requires_force_stop: bool,
    shared: Arc<Shared>,
    channels: Channels,
    queue: Sender<PumpMessage>,
    pump: Option<JoinHandle<()>>,
}

impl fmt::Debug for LifecycleController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleController")
            .field("core", &self.core.name())
            .field("boot", &self.boot)
            .field("state", &self.state())
            .finish()
    }
}

impl LifecycleController {
    pub fn builder(core: Arc<RemoteCore>, boot: BootMethod) -> ControllerBuilder {
        ControllerBuilder {
            core,
            boot,
            sequencer: None,
            trusted: None,
            stop_bell: None,
            spawn_bell: None,
            crash_reason: None,
            requires_force_stop: false,
        }
    }

    pub fn name(&self) -> &str {
        self.core.name()
    }

    pub fn core(&self) -> &Arc<RemoteCore> {
        &self.core
    }

    pub fn boot_method(&self) -> &BootMethod {
        &self.boot
    }

    pub fn sequencer(&self) -> Option<&Arc<PowerSequencer>> {
        self.sequencer.as_ref()
    }

    /// Interrupt line for `kind`, for wiring up the hardware side.
    pub fn channel(&self, kind: EventKind) -> Arc<EventChannel> {
        self.channels.get(kind).clone()
    }

    pub fn stop_doorbell(&self) -> Option<&Doorbell> {
        self.stop_bell.as_ref()
    }

    pub fn spawn_doorbell(&self) -> Option<&Doorbell> {
        self.spawn_bell.as_ref()
    }

    pub fn set_crash_callback(&self, cb: CrashCallback) {
        self.shared.reporter.set_callback(cb);
    }

    /// Resource release to run when the firmware signals handover.
    pub fn set_handover_callback(&self, cb: HandoverCallback) {
        let mut slot = self.shared.handover.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(Arc::from(cb));
    }

    fn peek<T>(&self, f: impl FnOnce(&Inner) -> T) -> T {
        let inner = self.shared.inner.lock().unwrap_or_else(|e| e.into_inner());
        f(&inner)
    }

    pub fn state(&self) -> State {
        self.peek(|i| i.state)
    }

    pub fn is_running(&self) -> bool {
        self.peek(|i| i.running)
    }

    pub fn handover_issued(&self) -> bool {
        self.peek(|i| i.handover_issued)
    }

    /// Kind of the last crash, cleared by `prepare()`.
    pub fn last_crash(&self) -> Option<CrashKind> {
        self.peek(|i| i.crash)
    }

    /// Reset wait conditions and arm the handover line.
    pub fn prepare(&self) -> Result<()> {
        {
            let mut inner = self.shared.lock()?;
            match inner.state {
                State::Unprepared | State::Prepared | State::Crashed => {}
                state => return Err(RprocError::AlreadyPrepared(state)),
            }
            inner.state = State::Prepared;
            inner.running = false;
            inner.handover_issued = false;
            inner.ready = false;
            inner.stop_acked = false;
            inner.spawn_acked = false;
            inner.crash = None;
        }
        self.channels.handover.enable();
        info!("{}: prepared", self.name());
        Ok(())
    }

    /// Load and boot `image`, then block until the firmware reports ready.
    ///
    /// A failure before the boot trigger returns the core to `Prepared`.
    /// Once the trigger has been sent the core stays in `Booting` on
    /// failure, since it may still be executing; the caller must
    /// intervene with `request_stop` or `unprepare`.
    pub fn start(&self, image: FirmwareImage, timeout: Duration) -> Result<()> {
        {
            let mut inner = self.shared.lock()?;
            if inner.state != State::Prepared {
                return Err(RprocError::InvalidState {
                    op: "start",
                    state: inner.state,
                });
            }
            inner.state = State::Booting;
            inner.running = false;
            inner.ready = false;
        }
        info!("{}: booting {}", self.name(), image.name());

        if let Err(e) = self.load(&image) {
            warn!("{}: load failed, back to prepared: {e}", self.name());
            let mut inner = self.shared.lock()?;
            if inner.state == State::Booting {
                inner.state = State::Prepared;
            }
            return Err(e);
        }

        let outcome = self
            .trigger(timeout)
            .and_then(|()| self.wait_ready(timeout));
        self.clear_debug_break();
        if outcome.is_err() {
            self.channels.handover.disable();
        }
        outcome
    }

    fn load(&self, image: &FirmwareImage) -> Result<()> {
        let core = &self.core;
        match &self.boot {
            BootMethod::Trusted { peripheral_id, .. } => {
                self.trusted_loader()?
                    .authenticate_and_load(*peripheral_id, image, core)
            }
            BootMethod::Sequencer { debug_break } => {
                firmware::load_segments(image, core.region(), core.memory())?;
                let entry = core.region().to_phys(image.entry()).ok_or_else(|| {
                    RprocError::Load(format!("entry 0x{:x} outside region", image.entry()))
                })?;
                let vector = boot_vector(entry)?;
                let regs = &self.power_sequencer()?.domain().core;
                regs.write(core_regs::RST_EVB, vector);
                if *debug_break {
                    info!("{}: debug break armed", self.name());
                    regs.write(core_regs::DBG_CFG, core_regs::DBG_CFG_BREAK);
                }
                Ok(())
            }
            BootMethod::Spawn => firmware::load_segments(image, core.region(), core.memory()),
        }
    }

    fn trigger(&self, timeout: Duration) -> Result<()> {
        match &self.boot {
            BootMethod::Trusted {
                peripheral_id,
                reset_cmd_id,
                debug_break,
            } => self
                .trusted_loader()?
                .reset_and_run(*peripheral_id, *debug_break, *reset_cmd_id),
            BootMethod::Sequencer { .. } => {
                let report = self.power_sequencer()?.power_up()?;
                if !report.soft_failures.is_empty() {
                    warn!(
                        "{}: power-up finished with {} advisory failures",
                        self.name(),
                        report.soft_failures.len()
                    );
                }
                Ok(())
            }
            BootMethod::Spawn => self.spawn_handshake(timeout),
        }
    }

    fn wait_ready(&self, timeout: Duration) -> Result<()> {
        let mut inner = self
            .shared
            .wait_while(timeout, |i| i.state == State::Booting && !i.ready)?;
        match inner.state {
            State::Booting if inner.ready => {
                inner.state = State::Running;
                inner.running = true;
                info!("{}: running", self.name());
                Ok(())
            }
            State::Booting => {
                warn!(
                    "{}: no ready within {timeout:?}, core left booting",
                    self.name()
                );
                Err(RprocError::StartTimeout(timeout))
            }
            State::Crashed => Err(RprocError::Crashed(
                inner.crash.unwrap_or(CrashKind::FatalError),
            )),
            state => Err(RprocError::InvalidState { op: "start", state }),
        }
    }

    fn clear_debug_break(&self) {
        if let (BootMethod::Sequencer { debug_break: true }, Some(seq)) =
            (&self.boot, self.sequencer.as_ref())
        {
            seq.domain().core.write(core_regs::DBG_CFG, 0);
        }
    }

    /// Ask a child partition's host firmware to spawn it.
    pub fn request_spawn(&self, timeout: Duration) -> Result<()> {
        if !self.core.is_child() {
            return Err(RprocError::NotChild);
        }
        self.spawn_handshake(timeout)
    }

    fn spawn_handshake(&self, timeout: Duration) -> Result<()> {
        let bell = self.spawn_bell.as_ref().ok_or_else(|| {
            RprocError::ResourceUnavailable(format!("{}: no spawn doorbell", self.name()))
        })?;
        self.shared.lock()?.spawn_acked = false;
        bell.raise();
        let waited = self
            .shared
            .wait_while(timeout, |i| !i.spawn_acked && i.state != State::Crashed)
            .map(|inner| (inner.spawn_acked, inner.crash));
        bell.clear();
        match waited? {
            (true, _) => {
                debug!("{}: spawn acknowledged", self.name());
                Ok(())
            }
            (false, Some(kind)) => Err(RprocError::Crashed(kind)),
            (false, None) => {
                warn!("{}: no spawn-ack within {timeout:?}", self.name());
                Err(RprocError::SpawnTimeout(timeout))
            }
        }
    }

    /// Ask the firmware to stop and wait for the acknowledgement.
    ///
    /// The core ends up `Prepared` even if the acknowledgement never
    /// arrives; the doorbell is cleared exactly once either way.
    pub fn request_stop(&self, timeout: Duration) -> Result<()> {
        let bell = self.stop_bell.as_ref().ok_or_else(|| {
            RprocError::ResourceUnavailable(format!("{}: no stop doorbell", self.name()))
        })?;
        {
            let mut inner = self.shared.lock()?;
            match inner.state {
                State::Running | State::Booting => {}
                state => {
                    return Err(RprocError::InvalidState {
                        op: "request_stop",
                        state,
                    })
                }
            }
            inner.state = State::Stopping;
            inner.running = false;
            inner.stop_acked = false;
        }
        info!("{}: stopping", self.name());
        bell.raise();
        let waited = self
            .shared
            .wait_while(timeout, |i| i.state == State::Stopping && !i.stop_acked)
            .map(|mut inner| {
                let seen = (inner.state, inner.stop_acked, inner.crash);
                if inner.state == State::Stopping {
                    inner.state = State::Prepared;
                }
                seen
            });
        bell.clear();
        match waited? {
            (State::Stopping, true, _) => {
                info!("{}: stopped", self.name());
                Ok(())
            }
            (State::Stopping, false, _) => {
                warn!(
                    "{}: no stop-ack within {timeout:?}, treating as stopped",
                    self.name()
                );
                Err(RprocError::StopTimeout(timeout))
            }
            (State::Crashed, _, kind) => {
                Err(RprocError::Crashed(kind.unwrap_or(CrashKind::FatalError)))
            }
            (state, _, _) => Err(RprocError::InvalidState {
                op: "request_stop",
                state,
            }),
        }
    }

    /// Disarm the handover line and return to `Unprepared`.
    ///
    /// Returns `true` when handover never happened: the handover callback
    /// will not fire any more and the caller must release the proxy
    /// resources itself.
    pub fn unprepare(&self) -> Result<bool> {
        let pending = {
            let mut inner = self.shared.lock()?;
            match inner.state {
                State::Booting | State::Prepared | State::Crashed => {}
                state => {
                    return Err(RprocError::InvalidState {
                        op: "unprepare",
                        state,
                    })
                }
            }
            inner.state = State::Unprepared;
            inner.running = false;
            !inner.handover_issued
        };
        self.channels.handover.disable();
        if pending {
            info!("{}: unprepared, handover still pending", self.name());
        } else {
            info!("{}: unprepared", self.name());
        }
        Ok(pending)
    }

    /// Entry point for the watchdog and fatal handlers; also usable by a
    /// supervisor that detected a crash through other means.
    pub fn notify_crash(&self, kind: CrashKind) {
        self.shared.crash(kind);
    }

    /// Take the core's power down through its boot path. Children share
    /// their parent's power and have nothing to do.
    pub fn power_down(&self) -> Result<()> {
        let state = self.state();
        if matches!(state, State::Running | State::Stopping) {
            return Err(RprocError::InvalidState {
                op: "power_down",
                state,
            });
        }
        match &self.boot {
            BootMethod::Trusted { peripheral_id, .. } => {
                self.trusted_loader()?.shutdown(*peripheral_id)
            }
            BootMethod::Sequencer { .. } => {
                let report = self.power_sequencer()?.power_down()?;
                if !report.soft_failures.is_empty() {
                    warn!(
                        "{}: power-down finished with {} advisory failures",
                        self.name(),
                        report.soft_failures.len()
                    );
                }
                Ok(())
            }
            BootMethod::Spawn => Ok(()),
        }
    }

    /// Stop (gracefully where required), power down and unprepare.
    /// Returns the `unprepare()` handover flag.
    pub fn shutdown(&self, timeout: Duration) -> Result<bool> {
        if self.state() == State::Running {
            if self.requires_force_stop || self.core.is_child() {
                self.request_stop(timeout)?;
            } else {
                let mut inner = self.shared.lock()?;
                inner.state = State::Prepared;
                inner.running = false;
            }
        }
        self.power_down()?;
        self.unprepare()
    }

    fn power_sequencer(&self) -> Result<&PowerSequencer> {
        self.sequencer.as_deref().ok_or_else(|| {
            RprocError::ResourceUnavailable(format!("{}: no power sequencer", self.name()))
        })
    }

    fn trusted_loader(&self) -> Result<&TrustedLoader> {
        self.trusted.as_ref().ok_or_else(|| {
            RprocError::ResourceUnavailable(format!("{}: no trusted service", self.name()))
        })
    }
}

impl Drop for LifecycleController {
    fn drop(&mut self) {
        let _ = self.queue.send(PumpMessage::Shutdown);
        if let Some(handle) = self.pump.take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}
