// CLASSIFICATION: COMMUNITY
// Filename: lib.rs v0.4
// Author: Lukas Bower
// Date Modified: 2026-10-17

//! Lifecycle control for auxiliary remote processor cores.
//!
//! A [`LifecycleController`] owns one [`RemoteCore`]: it prepares the core,
//! loads and boots firmware through one of three boot paths, waits for the
//! firmware's interrupt-driven answers, classifies crashes and drives the
//! core back down. The [`sim`] module supplies simulated hardware for tests
//! and the `rprocctl` binary.

pub mod cli;
pub mod config;
pub mod controller;
pub mod coredump;
pub mod crash;
pub mod error;
pub mod firmware;
pub mod hal;
pub mod power;
pub mod registry;
pub mod remote;
pub mod sim;
pub mod trusted;

pub use config::{BoardConfig, CoreConfig};
pub use controller::{BootMethod, LifecycleController, State};
pub use coredump::{CollectorRegistry, CoredumpCollector, DumpRegion};
pub use crash::{CrashKind, CrashReport};
pub use error::{AuthError, Result, RprocError};
pub use firmware::{FirmwareImage, Segment};
pub use hal::{Doorbell, EventKind, RegisterBank, RegisterGroup};
pub use power::{Direction, Family, PowerSequencer, Recipe};
pub use registry::CoreRegistry;
pub use remote::{MemoryRegion, RemoteCore, RemoteMemory};
pub use trusted::{TrustedLoader, TrustedService};
