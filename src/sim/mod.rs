// CLASSIFICATION: COMMUNITY
// Filename: mod.rs · sim v0.2
// Author: Lukas Bower
// Date Modified: 2026-10-17

// ─────────────────────────────────────────────────────────────
// Simulated hardware for remote core bring-up
//
// Register banks with status models, remote memory, a trusted
// execution environment and a firmware stand-in. Used by the
// integration tests and by `rprocctl simulate`.
// ─────────────────────────────────────────────────────────────

pub mod bank;
pub mod memory;
pub mod soc;
pub mod trusted;

pub use bank::SimRegisterBank;
pub use memory::SimMemory;
pub use soc::{SimBehavior, SimCore, SimCrashReason, SimHandle, SimSoc};
pub use trusted::{ImageSigner, SimTrustedService};
