// CLASSIFICATION: COMMUNITY
// Filename: mod.rs · HAL facade v0.3
// Date Modified: 2026-10-17
// Author: Lukas Bower
//
// ─────────────────────────────────────────────────────────────
// Remote-core Hardware‑Abstraction Layer (facade)
//
// Everything the control plane needs from the SoC is reached
// through three narrow seams:
//
//   • `hal::regs`      – 32‑bit register banks and the lock that
//                        scopes access to a (possibly shared) group
//   • `hal::irq`       – inbound interrupt lines as event channels
//   • `hal::doorbell`  – outbound signal bits in a shared register
//
// Real targets implement `RegisterBank` over MMIO; hosts use the
// banks in `crate::sim`.
// ─────────────────────────────────────────────────────────────

#![warn(missing_docs)]

/// Outbound signal bits.
pub mod doorbell;
/// Inbound interrupt lines.
pub mod irq;
/// Register banks and register groups.
pub mod regs;

pub use doorbell::{Doorbell, SignalGroup};
pub use irq::{CoreEvent, EventChannel, EventKind};
pub use regs::{RegisterBank, RegisterGroup};
