// CLASSIFICATION: COMMUNITY
// Filename: mod.rs v0.3
// Author: Lukas Bower
// Date Modified: 2026-10-17

//! `rprocctl` command dispatch.

pub mod args;

use std::fs::File;
use std::io;
use std::path::Path;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use clap::Parser;
use log::debug;

use crate::config::{BoardConfig, CoreConfig};
use crate::controller::{LifecycleController, State};
use crate::coredump::{CollectOutcome, CoredumpCollector, DumpRegion};
use crate::crash::{CrashKind, CrashReport};
use crate::hal::EventKind;
use crate::power::{Direction, PollCond, Step};
use crate::registry::CoreRegistry;
use crate::sim::{SimBehavior, SimHandle, SimSoc};

use args::{Cli, Command, RecipeArgs, SimulateArgs};

/// How long `simulate` waits for an injected crash to be classified.
const CRASH_WAIT: Duration = Duration::from_secs(2);
const DUMP_OPEN_WAIT: Duration = Duration::from_secs(5);

pub fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Simulate(args) => simulate(&args),
        Command::Recipe(args) => print_recipe(&args),
        Command::CheckConfig { path } => check_config(&path),
    }
}

fn load_board(path: &Path) -> anyhow::Result<BoardConfig> {
    BoardConfig::load(path).with_context(|| format!("loading {}", path.display()))
}

fn check_config(path: &Path) -> anyhow::Result<()> {
    let board = load_board(path)?;
    for core in &board.cores {
        let parent = core.parent.as_deref().unwrap_or("-");
        println!(
            "{:<12} parent={:<8} memory=0x{:x}+0x{:x}",
            core.name, parent, core.memory.phys, core.memory.size
        );
    }
    println!("{} cores ok", board.cores.len());
    Ok(())
}

fn print_recipe(args: &RecipeArgs) -> anyhow::Result<()> {
    let board = load_board(&args.config)?;
    let cfg = board
        .core(&args.core)
        .ok_or_else(|| anyhow!("no core named {}", args.core))?;
    let family = cfg
        .family
        .as_ref()
        .ok_or_else(|| anyhow!("{} has no power recipe family", cfg.name))?;
    let (up, down) = family.recipes();
    let (dir, recipe) = if args.down {
        (Direction::Down, down)
    } else {
        (Direction::Up, up)
    };
    println!("{} {} ({}, {} steps)", cfg.name, dir, recipe.name(), recipe.len());
    for (i, s) in recipe.steps().iter().enumerate() {
        println!("{i:3}  {:<28} {}", s.label, describe(&s.step));
    }
    Ok(())
}

fn describe(step: &Step) -> String {
    match step {
        Step::Write { bank, offset, value } => format!("{bank:?}[0x{offset:x}] = 0x{value:08x}"),
        Step::Update {
            bank,
            offset,
            mask,
            value,
        } => format!("{bank:?}[0x{offset:x}] &0x{mask:08x} <- 0x{value:08x}"),
        Step::ReadBack { bank, offset } => format!("read {bank:?}[0x{offset:x}]"),
        Step::Delay(d) => format!("delay {d:?}"),
        Step::Poll {
            bank,
            offset,
            cond,
            timeout,
            severity,
            ..
        } => {
            let cond = match cond {
                PollCond::Equals { mask, expect } => format!("&0x{mask:x} == 0x{expect:x}"),
                PollCond::AnySet(m) => format!("any 0x{m:x}"),
                PollCond::AllClear(m) => format!("clear 0x{m:x}"),
            };
            format!("poll {bank:?}[0x{offset:x}] {cond} within {timeout:?} ({severity:?})")
        }
    }
}

fn behavior_for(args: &SimulateArgs) -> SimBehavior {
    SimBehavior {
        ready_after: (!args.withhold_ready).then(|| Duration::from_millis(args.ready_after_ms)),
        stop_ack_after: (!args.withhold_stop_ack)
            .then(|| Duration::from_millis(args.stop_ack_after_ms)),
        ..SimBehavior::default()
    }
}

/// Build every core of the board on one simulated SoC, parents first.
fn build_board(
    soc: &SimSoc,
    board: &BoardConfig,
    target: &str,
    behavior: &SimBehavior,
) -> anyhow::Result<(CoreRegistry, Vec<SimHandle>)> {
    let registry = CoreRegistry::new();
    let mut handles: Vec<SimHandle> = Vec::new();
    for cfg in &board.cores {
        let parent = match &cfg.parent {
            Some(p) => Some(
                registry
                    .get(p)
                    .ok_or_else(|| anyhow!("{}: parent {p} not built", cfg.name))?,
            ),
            None => None,
        };
        let b = if cfg.name == target {
            behavior.clone()
        } else {
            SimBehavior::default()
        };
        let handle = soc.build_core(cfg, parent.as_ref(), b)?;
        registry.register(handle.controller.clone())?;
        handles.push(handle);
    }
    Ok((registry, handles))
}

fn start(soc: &SimSoc, cfg: &CoreConfig, ctl: &LifecycleController) -> anyhow::Result<()> {
    ctl.prepare()?;
    println!("{}: {}", ctl.name(), ctl.state());
    let res = ctl.start(soc.image_for(cfg), cfg.start_timeout());
    println!("{}: {}", ctl.name(), ctl.state());
    res.with_context(|| format!("starting {}", ctl.name()))
}

fn stop(cfg: &CoreConfig, ctl: &LifecycleController) -> anyhow::Result<()> {
    let pending = ctl.shutdown(cfg.stop_timeout())?;
    println!(
        "{}: {}{}",
        ctl.name(),
        ctl.state(),
        if pending { " (handover pending)" } else { "" }
    );
    Ok(())
}

fn simulate(args: &SimulateArgs) -> anyhow::Result<()> {
    let board = load_board(&args.config)?;
    let target = match &args.core {
        Some(name) => board
            .core(name)
            .ok_or_else(|| anyhow!("no core named {name}"))?,
        None => board
            .cores
            .first()
            .ok_or_else(|| anyhow!("board has no cores"))?,
    };
    let soc = SimSoc::new();
    let (registry, handles) = build_board(&soc, &board, &target.name, &behavior_for(args))?;
    let handle = handles
        .iter()
        .find(|h| h.controller.name() == target.name)
        .ok_or_else(|| anyhow!("{} not built", target.name))?;
    let ctl = handle.controller.clone();

    let parent = match &target.parent {
        Some(p) => {
            let pcfg = board
                .core(p)
                .ok_or_else(|| anyhow!("no core named {p}"))?;
            let pctl = registry
                .get(p)
                .ok_or_else(|| anyhow!("{p} not registered"))?;
            start(&soc, pcfg, &pctl)?;
            Some((pcfg, pctl))
        }
        None => None,
    };

    let (tx, rx) = mpsc::channel::<CrashReport>();
    ctl.set_crash_callback(Box::new(move |report: &CrashReport| {
        let _ = tx.send(report.clone());
    }));

    start(&soc, target, &ctl)?;

    match args.crash {
        Some(kind) => {
            crash_and_collect(args, handle, kind.into(), &rx)?;
            ctl.power_down()?;
            let pending = ctl.unprepare()?;
            println!(
                "{}: {}{}",
                ctl.name(),
                ctl.state(),
                if pending { " (handover pending)" } else { "" }
            );
            if args.recover {
                start(&soc, target, &ctl)?;
                stop(target, &ctl)?;
            }
        }
        None => stop(target, &ctl)?,
    }

    if let Some((pcfg, pctl)) = parent {
        stop(pcfg, &pctl)?;
    }
    Ok(())
}

fn crash_and_collect(
    args: &SimulateArgs,
    handle: &SimHandle,
    kind: CrashKind,
    reports: &mpsc::Receiver<CrashReport>,
) -> anyhow::Result<()> {
    let ctl = &handle.controller;
    handle.crash_reason.set(match kind {
        CrashKind::Watchdog => "watchdog bite",
        CrashKind::FatalError => "err_fatal: simulated",
    });
    let line = match kind {
        CrashKind::Watchdog => EventKind::Watchdog,
        CrashKind::FatalError => EventKind::Fatal,
    };
    if !handle.sim.crash(line) {
        bail!("{}: {} line not connected", ctl.name(), line.irq_name());
    }
    let report = reports
        .recv_timeout(CRASH_WAIT)
        .map_err(|_| anyhow!("{}: crash not reported", ctl.name()))?;
    println!(
        "{}: {} ({}): {}",
        ctl.name(),
        ctl.state(),
        report.kind,
        report.diagnostic.as_deref().unwrap_or("no reason")
    );
    if ctl.state() != State::Crashed {
        bail!("{}: expected crashed, found {}", ctl.name(), ctl.state());
    }

    if let Some(path) = &args.dump {
        let region = *ctl.core().region();
        let collector = Arc::new(CoredumpCollector::new(ctl.name(), handle.memory.clone()));
        let producer = {
            let collector = collector.clone();
            thread::spawn(move || {
                collector.collect(vec![DumpRegion {
                    addr: region.phys,
                    size: region.size,
                }])
            })
        };
        let copied = {
            let mut reader = collector.open(DUMP_OPEN_WAIT)?;
            let mut out =
                File::create(path).with_context(|| format!("creating {}", path.display()))?;
            io::copy(&mut reader, &mut out)?
        };
        let outcome = producer
            .join()
            .map_err(|_| anyhow!("coredump producer panicked"))??;
        debug!("coredump outcome {outcome:?}");
        if outcome != CollectOutcome::Completed {
            bail!("{}: coredump expired", ctl.name());
        }
        println!("{}: coredump {copied} bytes -> {}", ctl.name(), path.display());
    }
    Ok(())
}
