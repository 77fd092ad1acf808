// CLASSIFICATION: COMMUNITY
// Filename: memory.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-17

//! Byte-addressable stand-in for a core's reserved memory.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::coredump::{DumpRegion, MappedRegion, RegionMapper};
use crate::error::{Result, RprocError};
use crate::remote::{MemoryRegion, RemoteMemory};

#[derive(Debug)]
pub struct SimMemory {
    region: MemoryRegion,
    bytes: Mutex<Vec<u8>>,
    mapped: Arc<AtomicUsize>,
    peak_mapped: Arc<AtomicUsize>,
}

impl SimMemory {
    pub fn new(region: MemoryRegion) -> Self {
        Self {
            region,
            bytes: Mutex::new(vec![0; region.size as usize]),
            mapped: Arc::new(AtomicUsize::new(0)),
            peak_mapped: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn range(&self, offset: u64, len: u64) -> Result<std::ops::Range<usize>> {
        let end = offset
            .checked_add(len)
            .filter(|&end| end <= self.region.size)
            .ok_or_else(|| {
                RprocError::Load(format!(
                    "access 0x{offset:x}+0x{len:x} beyond 0x{:x} byte region",
                    self.region.size
                ))
            })?;
        Ok(offset as usize..end as usize)
    }

    /// Largest number of regions mapped at the same time so far.
    pub fn peak_mapped(&self) -> usize {
        self.peak_mapped.load(Ordering::SeqCst)
    }
}

impl RemoteMemory for SimMemory {
    fn write(&self, offset: u64, data: &[u8]) -> Result<()> {
        let r = self.range(offset, data.len() as u64)?;
        self.bytes.lock()?[r].copy_from_slice(data);
        Ok(())
    }

    fn fill(&self, offset: u64, len: u64, byte: u8) -> Result<()> {
        let r = self.range(offset, len)?;
        self.bytes.lock()?[r].fill(byte);
        Ok(())
    }

    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let r = self.range(offset, buf.len() as u64)?;
        buf.copy_from_slice(&self.bytes.lock()?[r]);
        Ok(())
    }
}

/// A copied-out region; counts itself in the owner's mapping gauge.
struct SimMapping {
    bytes: Vec<u8>,
    mapped: Arc<AtomicUsize>,
}

impl MappedRegion for SimMapping {
    fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl Drop for SimMapping {
    fn drop(&mut self) {
        self.mapped.fetch_sub(1, Ordering::SeqCst);
    }
}

impl RegionMapper for SimMemory {
    fn map(&self, region: &DumpRegion) -> io::Result<Box<dyn MappedRegion>> {
        let offset = region
            .addr
            .checked_sub(self.region.phys)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "below region"))?;
        let r = self
            .range(offset, region.size)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;
        let bytes = self
            .bytes
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "memory lock poisoned"))?[r]
            .to_vec();
        let now = self.mapped.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_mapped.fetch_max(now, Ordering::SeqCst);
        Ok(Box::new(SimMapping {
            bytes,
            mapped: self.mapped.clone(),
        }))
    }
}
