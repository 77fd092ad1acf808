// CLASSIFICATION: COMMUNITY
// Filename: trusted.rs v0.2
// Author: Lukas Bower
// Date Modified: 2026-10-17

//! Authenticated boot through an external trusted execution environment.
//!
//! Every call is long-running and synchronous. Nothing here retries; the
//! caller decides what to do with a failure.

use std::fmt;
use std::sync::Arc;

use log::{error, info};

use crate::error::{AuthError, Result, RprocError};
use crate::firmware::{self, FirmwareImage};
use crate::remote::RemoteCore;

/// Calls exposed by the trusted service for a peripheral.
pub trait TrustedService: Send + Sync {
    /// Check the image metadata and signature and authorise it for
    /// `peripheral_id`. `image_size` is the total size of the load segments.
    fn verify_and_authorize(
        &self,
        peripheral_id: u32,
        image: &[u8],
        image_size: u64,
    ) -> std::result::Result<(), AuthError>;

    /// Release the peripheral from reset and run the authorised image.
    fn reset_and_run(
        &self,
        peripheral_id: u32,
        debug_break: bool,
        reset_cmd_id: u32,
    ) -> std::result::Result<(), i32>;

    /// Stop the peripheral and revoke the authorisation.
    fn shutdown_peripheral(&self, peripheral_id: u32) -> std::result::Result<(), i32>;
}

/// Adapter between a controller and its [`TrustedService`].
#[derive(Clone)]
pub struct TrustedLoader {
    service: Arc<dyn TrustedService>,
}

impl fmt::Debug for TrustedLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustedLoader").finish_non_exhaustive()
    }
}

impl TrustedLoader {
    pub fn new(service: Arc<dyn TrustedService>) -> Self {
        Self { service }
    }

    /// Submit the image for verification, then copy its segments into the
    /// core's memory region.
    pub fn authenticate_and_load(
        &self,
        peripheral_id: u32,
        image: &FirmwareImage,
        core: &RemoteCore,
    ) -> Result<()> {
        info!(
            "{}: authenticating {} (digest {})",
            core.name(),
            image.name(),
            image.digest_hex()
        );
        self.service
            .verify_and_authorize(peripheral_id, &image.auth_blob(), image.image_size())
            .map_err(|e| {
                error!("{}: image rejected: {e}", core.name());
                RprocError::Auth(e)
            })?;
        firmware::load_segments(image, core.region(), core.memory())
    }

    pub fn reset_and_run(&self, peripheral_id: u32, debug_break: bool, reset_cmd_id: u32) -> Result<()> {
        self.service
            .reset_and_run(peripheral_id, debug_break, reset_cmd_id)
            .map_err(|code| {
                error!("peripheral {peripheral_id}: reset_and_run failed ({code})");
                RprocError::Trusted {
                    call: "reset_and_run",
                    code,
                }
            })
    }

    pub fn shutdown(&self, peripheral_id: u32) -> Result<()> {
        self.service
            .shutdown_peripheral(peripheral_id)
            .map_err(|code| {
                error!("peripheral {peripheral_id}: shutdown failed ({code})");
                RprocError::Trusted {
                    call: "shutdown",
                    code,
                }
            })
    }
}
