// CLASSIFICATION: COMMUNITY
// Filename: error.rs v0.2
// Author: Lukas Bower
// Date Modified: 2026-10-17

//! Error types shared by every remote core component.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::controller::State;
use crate::crash::CrashKind;

/// Reasons the trusted verification service refuses an image.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("image signature missing or malformed")]
    BadSignature,
    #[error("image digest {0} not authorised for this peripheral")]
    UnknownImage(String),
    #[error("trusted service rejected request (code {0})")]
    Rejected(i32),
}

/// Errors returned by lifecycle, sequencer, loader and coredump operations.
#[derive(Debug, Error)]
pub enum RprocError {
    #[error("core is already prepared or mid-flight ({0:?})")]
    AlreadyPrepared(State),
    #[error("core did not report ready within {0:?}")]
    StartTimeout(Duration),
    #[error("core did not acknowledge stop within {0:?}")]
    StopTimeout(Duration),
    #[error("core did not acknowledge spawn within {0:?}")]
    SpawnTimeout(Duration),
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),
    #[error("sequencer step {index} ({label}) failed: {reason}")]
    SequencerStep {
        index: usize,
        label: &'static str,
        reason: String,
    },
    #[error("resource unavailable: {0}")]
    ResourceUnavailable(String),
    #[error("{op} not valid in state {state:?}")]
    InvalidState { op: &'static str, state: State },
    #[error("operation requires a child core")]
    NotChild,
    #[error("core crashed while booting ({0})")]
    Crashed(CrashKind),
    #[error("trusted service call {call} failed (code {code})")]
    Trusted { call: &'static str, code: i32 },
    #[error("segment load failed: {0}")]
    Load(String),
    #[error("coredump: {0}")]
    Coredump(String),
    #[error("controller lock poisoned")]
    LockPoisoned,
}

/// Advisory sequencer failure. Logged and recorded, never aborts a recipe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoftFailure {
    pub index: usize,
    pub label: &'static str,
    pub last_value: u32,
}

impl fmt::Display for SoftFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "advisory step {} ({}) timed out, last read 0x{:08x}",
            self.index, self.label, self.last_value
        )
    }
}

pub type Result<T> = std::result::Result<T, RprocError>;

impl<T> From<std::sync::PoisonError<T>> for RprocError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        RprocError::LockPoisoned
    }
}
