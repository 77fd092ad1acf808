// CLASSIFICATION: COMMUNITY
// Filename: trusted.rs · simulated TEE v0.2
// Author: Lukas Bower
// Date Modified: 2026-10-17

//! Simulated trusted execution environment.
//!
//! Images are accepted when their detached ed25519 signature over the
//! metadata digest verifies against the installed key, or when the digest is
//! on the allowlist. A peripheral may only be reset into an authorised image.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Mutex, MutexGuard, Weak};

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use log::{debug, info, warn};
use sha2::{Digest, Sha256};

use super::soc::SimCore;
use crate::error::AuthError;
use crate::firmware::{split_auth_blob, FirmwareImage};
use crate::trusted::TrustedService;

/// Error code for calls on an unauthorised peripheral.
pub const EPERM: i32 = -1;
/// Error code for calls on an unknown peripheral.
pub const ENODEV: i32 = -19;

#[derive(Default)]
pub struct SimTrustedService {
    key: Option<VerifyingKey>,
    allowlist: Mutex<HashSet<[u8; 32]>>,
    authorised: Mutex<HashSet<u32>>,
    cores: Mutex<HashMap<u32, Weak<SimCore>>>,
    reject_code: AtomicI32,
}

fn relock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl SimTrustedService {
    /// A service with no key; only allowlisted digests pass.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(key: VerifyingKey) -> Self {
        Self {
            key: Some(key),
            ..Self::default()
        }
    }

    /// Authorise an image digest regardless of signature.
    pub fn allow_digest(&self, digest: [u8; 32]) {
        relock(&self.allowlist).insert(digest);
    }

    /// Route `reset_and_run`/`shutdown_peripheral` for `peripheral_id` to a
    /// simulated core.
    pub fn attach(&self, peripheral_id: u32, core: Weak<SimCore>) {
        relock(&self.cores).insert(peripheral_id, core);
    }

    /// Make every subsequent verification fail with `code`. Zero clears it.
    pub fn reject_all(&self, code: i32) {
        self.reject_code.store(code, Ordering::SeqCst);
    }

    pub fn is_authorised(&self, peripheral_id: u32) -> bool {
        relock(&self.authorised).contains(&peripheral_id)
    }

    fn core(&self, peripheral_id: u32) -> Option<std::sync::Arc<SimCore>> {
        relock(&self.cores).get(&peripheral_id).and_then(Weak::upgrade)
    }
}

impl TrustedService for SimTrustedService {
    fn verify_and_authorize(
        &self,
        peripheral_id: u32,
        image: &[u8],
        image_size: u64,
    ) -> Result<(), AuthError> {
        let code = self.reject_code.load(Ordering::SeqCst);
        if code != 0 {
            return Err(AuthError::Rejected(code));
        }
        let (meta, sig) = split_auth_blob(image).ok_or(AuthError::BadSignature)?;
        let digest: [u8; 32] = Sha256::digest(meta).into();

        let signed = match (&self.key, sig.is_empty()) {
            (Some(key), false) => {
                let sig = Signature::from_slice(sig).map_err(|_| AuthError::BadSignature)?;
                key.verify(&digest, &sig).is_ok()
            }
            _ => false,
        };
        if !signed && !relock(&self.allowlist).contains(&digest) {
            warn!("tee: peripheral {peripheral_id} image {} refused", hex::encode(digest));
            return Err(if sig.is_empty() || self.key.is_none() {
                AuthError::UnknownImage(hex::encode(digest))
            } else {
                AuthError::BadSignature
            });
        }
        relock(&self.authorised).insert(peripheral_id);
        info!("tee: peripheral {peripheral_id} authorised ({image_size} bytes)");
        Ok(())
    }

    fn reset_and_run(
        &self,
        peripheral_id: u32,
        debug_break: bool,
        reset_cmd_id: u32,
    ) -> Result<(), i32> {
        if !self.is_authorised(peripheral_id) {
            return Err(EPERM);
        }
        let core = self.core(peripheral_id).ok_or(ENODEV)?;
        debug!("tee: reset peripheral {peripheral_id} cmd 0x{reset_cmd_id:x} break={debug_break}");
        core.boot();
        Ok(())
    }

    fn shutdown_peripheral(&self, peripheral_id: u32) -> Result<(), i32> {
        if !relock(&self.authorised).remove(&peripheral_id) {
            return Err(EPERM);
        }
        if let Some(core) = self.core(peripheral_id) {
            core.halt();
        }
        debug!("tee: peripheral {peripheral_id} shut down");
        Ok(())
    }
}

/// Signing side used by tests and the simulator to produce accepted images.
pub struct ImageSigner {
    key: SigningKey,
}

impl ImageSigner {
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            key: SigningKey::from_bytes(seed),
        }
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.key.verifying_key()
    }

    pub fn sign(&self, image: FirmwareImage) -> FirmwareImage {
        let sig = self.key.sign(&image.digest());
        image.with_signature(sig.to_bytes().to_vec())
    }
}
