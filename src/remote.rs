// CLASSIFICATION: COMMUNITY
// Filename: remote.rs v0.2
// Author: Lukas Bower
// Date Modified: 2026-10-17

//! Remote core descriptors.
//!
//! A [`RemoteCore`] is created once at bring-up and never reused for a
//! different physical core. Child partitions hold a [`Weak`] reference to the
//! parent that owns the shared power resources.

use std::fmt;
use std::sync::{Arc, Weak};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Carve-out of system memory reserved for a core's firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryRegion {
    /// Physical base address.
    pub phys: u64,
    /// Link address the firmware was built for.
    pub reloc: u64,
    pub size: u64,
}

impl MemoryRegion {
    /// Byte offset into the region for a link-address range, if it fits.
    pub fn offset_of(&self, addr: u64, len: u64) -> Option<u64> {
        let offset = addr.checked_sub(self.reloc)?;
        let end = offset.checked_add(len)?;
        (end <= self.size).then_some(offset)
    }

    /// Translate a link address to its physical address.
    pub fn to_phys(&self, addr: u64) -> Option<u64> {
        self.offset_of(addr, 0).map(|off| self.phys + off)
    }
}

/// Backing store for a core's memory region.
pub trait RemoteMemory: Send + Sync {
    fn write(&self, offset: u64, data: &[u8]) -> Result<()>;
    fn fill(&self, offset: u64, len: u64, byte: u8) -> Result<()>;
    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<()>;
}

pub struct RemoteCore {
    name: String,
    parent: Option<Weak<RemoteCore>>,
    firmware: String,
    region: MemoryRegion,
    memory: Arc<dyn RemoteMemory>,
}

impl fmt::Debug for RemoteCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteCore")
            .field("name", &self.name)
            .field("child", &self.is_child())
            .field("firmware", &self.firmware)
            .field("region", &self.region)
            .finish()
    }
}

impl RemoteCore {
    pub fn new(
        name: impl Into<String>,
        firmware: impl Into<String>,
        region: MemoryRegion,
        memory: Arc<dyn RemoteMemory>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            parent: None,
            firmware: firmware.into(),
            region,
            memory,
        })
    }

    /// A firmware partition hosted on `parent`'s physical core.
    pub fn new_child(
        parent: &Arc<RemoteCore>,
        name: impl Into<String>,
        firmware: impl Into<String>,
        region: MemoryRegion,
        memory: Arc<dyn RemoteMemory>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            parent: Some(Arc::downgrade(parent)),
            firmware: firmware.into(),
            region,
            memory,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The parent core, if this is a child and the parent is still alive.
    pub fn parent(&self) -> Option<Arc<RemoteCore>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    pub fn is_child(&self) -> bool {
        self.parent.is_some()
    }

    pub fn firmware_name(&self) -> &str {
        &self.firmware
    }

    pub fn region(&self) -> &MemoryRegion {
        &self.region
    }

    pub fn memory(&self) -> &dyn RemoteMemory {
        self.memory.as_ref()
    }
}
