// CLASSIFICATION: COMMUNITY
// Filename: coredump.rs v0.3
// Author: Lukas Bower
// Date Modified: 2026-10-17

//! Crash memory collection as a sequential byte stream.
//!
//! The producer ([`CoredumpCollector::collect`]) snapshots the region list
//! and arms the collector, then waits for a reader to finish or for the
//! collection deadline. The consumer opens a [`CoredumpReader`] and reads:
//!
//! ```text
//! u32 count | count x (u64 addr, u64 size) | region bytes in order
//! ```
//!
//! All integers are little-endian. Regions are mapped one at a time, only
//! while their bytes are being served. When the deadline passes the region
//! list is discarded and an open reader sees end-of-file early.

use std::fmt;
use std::io::{self, Read};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, info, warn};

use crate::error::{Result, RprocError};

/// Default upper bound on one collection.
pub const COLLECT_TIMEOUT: Duration = Duration::from_secs(120);
/// Number of collectors a [`CollectorRegistry`] holds.
pub const MAX_COLLECTORS: usize = 5;

/// One physical memory range to dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DumpRegion {
    pub addr: u64,
    pub size: u64,
}

/// Bytes of a region while it is mapped. Unmapped on drop.
pub trait MappedRegion: Send {
    fn bytes(&self) -> &[u8];
}

/// Maps physical regions for reading.
pub trait RegionMapper: Send + Sync {
    fn map(&self, region: &DumpRegion) -> io::Result<Box<dyn MappedRegion>>;
}

/// How a collection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectOutcome {
    /// A reader opened the stream and released it.
    Completed,
    /// Nobody finished reading before the deadline.
    Expired,
}

#[derive(Debug, Default)]
struct DumpState {
    regions: Option<Arc<Vec<DumpRegion>>>,
    generation: u64,
    reader_open: bool,
    released: bool,
}

impl DumpState {
    fn armed(&self) -> bool {
        self.regions.is_some()
    }
}

#[derive(Debug, Default)]
struct DumpShared {
    state: Mutex<DumpState>,
    cond: Condvar,
}

impl DumpShared {
    fn lock(&self) -> MutexGuard<'_, DumpState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Per-core crash memory collector.
pub struct CoredumpCollector {
    name: String,
    mapper: Arc<dyn RegionMapper>,
    shared: Arc<DumpShared>,
    collect_timeout: Duration,
}

impl fmt::Debug for CoredumpCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoredumpCollector")
            .field("name", &self.name)
            .field("collect_timeout", &self.collect_timeout)
            .finish()
    }
}

impl CoredumpCollector {
    pub fn new(name: impl Into<String>, mapper: Arc<dyn RegionMapper>) -> Self {
        Self::with_timeout(name, mapper, COLLECT_TIMEOUT)
    }

    pub fn with_timeout(
        name: impl Into<String>,
        mapper: Arc<dyn RegionMapper>,
        collect_timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            mapper,
            shared: Arc::new(DumpShared::default()),
            collect_timeout,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_armed(&self) -> bool {
        self.shared.lock().armed()
    }

    /// Publish `regions` and block until a reader is done with them or the
    /// collection deadline passes.
    pub fn collect(&self, regions: Vec<DumpRegion>) -> Result<CollectOutcome> {
        if regions.is_empty() {
            return Err(RprocError::Coredump(format!("{}: no regions to dump", self.name)));
        }
        let count = regions.len();
        let mut st = self.shared.lock();
        if st.armed() {
            return Err(RprocError::ResourceUnavailable(format!(
                "{}: collection already in progress",
                self.name
            )));
        }
        st.generation += 1;
        let generation = st.generation;
        st.regions = Some(Arc::new(regions));
        st.released = false;
        self.shared.cond.notify_all();
        info!("{}: coredump armed, {count} regions", self.name);

        let (mut st, _) = self
            .shared
            .cond
            .wait_timeout_while(st, self.collect_timeout, |s| {
                s.generation == generation && !s.released
            })
            .unwrap_or_else(|e| e.into_inner());
        let outcome = if st.released {
            debug!("{}: coredump collected", self.name);
            CollectOutcome::Completed
        } else {
            warn!(
                "{}: coredump not collected within {:?}, discarding",
                self.name, self.collect_timeout
            );
            CollectOutcome::Expired
        };
        st.regions = None;
        st.released = false;
        self.shared.cond.notify_all();
        Ok(outcome)
    }

    /// Wait up to `timeout` for a collection to be armed, then open it.
    pub fn open(&self, timeout: Duration) -> Result<CoredumpReader> {
        let st = self.shared.lock();
        let (st, _) = self
            .shared
            .cond
            .wait_timeout_while(st, timeout, |s| !s.armed() || s.reader_open)
            .unwrap_or_else(|e| e.into_inner());
        self.open_locked(st)
            .map_err(|_| RprocError::Coredump(format!("{}: nothing to collect within {timeout:?}", self.name)))
    }

    /// Open without waiting.
    pub fn try_open(&self) -> Result<CoredumpReader> {
        let st = self.shared.lock();
        self.open_locked(st)
    }

    fn open_locked(&self, mut st: MutexGuard<'_, DumpState>) -> Result<CoredumpReader> {
        if st.reader_open {
            return Err(RprocError::ResourceUnavailable(format!(
                "{}: coredump already open",
                self.name
            )));
        }
        let regions = match &st.regions {
            Some(r) => r.clone(),
            None => {
                return Err(RprocError::ResourceUnavailable(format!(
                    "{}: no coredump armed",
                    self.name
                )))
            }
        };
        st.reader_open = true;
        debug!("{}: coredump opened", self.name);
        Ok(CoredumpReader {
            header: encode_header(&regions),
            regions,
            generation: st.generation,
            shared: self.shared.clone(),
            mapper: self.mapper.clone(),
            cursor: Cursor::Header(0),
            current: None,
        })
    }
}

fn encode_header(regions: &[DumpRegion]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + regions.len() * 16);
    out.extend_from_slice(&(regions.len() as u32).to_le_bytes());
    for r in regions {
        out.extend_from_slice(&r.addr.to_le_bytes());
        out.extend_from_slice(&r.size.to_le_bytes());
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cursor {
    Header(usize),
    Region { index: usize, offset: usize },
    Done,
}

/// Sequential reader over an armed collection. Dropping it releases the
/// producer.
pub struct CoredumpReader {
    header: Vec<u8>,
    regions: Arc<Vec<DumpRegion>>,
    generation: u64,
    shared: Arc<DumpShared>,
    mapper: Arc<dyn RegionMapper>,
    cursor: Cursor,
    current: Option<Box<dyn MappedRegion>>,
}

impl fmt::Debug for CoredumpReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoredumpReader")
            .field("regions", &self.regions.len())
            .field("cursor", &self.cursor)
            .finish()
    }
}

impl CoredumpReader {
    /// Total stream length if read to the end.
    pub fn len(&self) -> u64 {
        self.header.len() as u64 + self.regions.iter().map(|r| r.size).sum::<u64>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn still_armed(&self) -> bool {
        let st = self.shared.lock();
        st.generation == self.generation && st.armed()
    }
}

impl Read for CoredumpReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            match self.cursor {
                Cursor::Done => return Ok(0),
                Cursor::Header(off) => {
                    if off < self.header.len() {
                        let n = buf.len().min(self.header.len() - off);
                        buf[..n].copy_from_slice(&self.header[off..off + n]);
                        self.cursor = Cursor::Header(off + n);
                        return Ok(n);
                    }
                    self.cursor = Cursor::Region { index: 0, offset: 0 };
                }
                Cursor::Region { index, offset } => {
                    if index >= self.regions.len() {
                        self.cursor = Cursor::Done;
                        continue;
                    }
                    if !self.still_armed() {
                        debug!("coredump discarded under reader, ending stream");
                        self.current = None;
                        self.cursor = Cursor::Done;
                        continue;
                    }
                    if self.current.is_none() {
                        self.current = Some(self.mapper.map(&self.regions[index])?);
                    }
                    let bytes = match &self.current {
                        Some(m) => m.bytes(),
                        None => &[],
                    };
                    if offset >= bytes.len() {
                        // Unmap before moving on so only one region is mapped.
                        self.current = None;
                        self.cursor = Cursor::Region {
                            index: index + 1,
                            offset: 0,
                        };
                        continue;
                    }
                    let n = buf.len().min(bytes.len() - offset);
                    buf[..n].copy_from_slice(&bytes[offset..offset + n]);
                    self.cursor = Cursor::Region {
                        index,
                        offset: offset + n,
                    };
                    return Ok(n);
                }
            }
        }
    }
}

impl Drop for CoredumpReader {
    fn drop(&mut self) {
        self.current = None;
        let mut st = self.shared.lock();
        st.reader_open = false;
        if st.generation == self.generation && st.armed() {
            st.released = true;
        }
        self.shared.cond.notify_all();
    }
}

/// Bounded table of collectors addressed by slot index.
#[derive(Debug)]
pub struct CollectorRegistry {
    slots: Mutex<Vec<Option<Arc<CoredumpCollector>>>>,
}

impl Default for CollectorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CollectorRegistry {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(vec![None; MAX_COLLECTORS]),
        }
    }

    /// Take the lowest free slot.
    pub fn register(&self, collector: Arc<CoredumpCollector>) -> Result<usize> {
        let mut slots = self.slots.lock()?;
        let index = slots.iter().position(Option::is_none).ok_or_else(|| {
            RprocError::ResourceUnavailable(format!(
                "coredump registry full ({MAX_COLLECTORS} collectors)"
            ))
        })?;
        info!("coredump slot {index}: {}", collector.name());
        slots[index] = Some(collector);
        Ok(index)
    }

    pub fn get(&self, index: usize) -> Option<Arc<CoredumpCollector>> {
        let slots = self.slots.lock().ok()?;
        slots.get(index).cloned().flatten()
    }

    pub fn unregister(&self, index: usize) -> Option<Arc<CoredumpCollector>> {
        let mut slots = self.slots.lock().ok()?;
        slots.get_mut(index).and_then(Option::take)
    }

    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .map(|s| s.iter().filter(|c| c.is_some()).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Pattern;

    struct Owned(Vec<u8>);

    impl MappedRegion for Owned {
        fn bytes(&self) -> &[u8] {
            &self.0
        }
    }

    impl RegionMapper for Pattern {
        fn map(&self, region: &DumpRegion) -> io::Result<Box<dyn MappedRegion>> {
            Ok(Box::new(Owned(vec![region.addr as u8; region.size as usize])))
        }
    }

    #[test]
    fn header_layout() {
        let h = encode_header(&[DumpRegion { addr: 0x1000, size: 0x20 }]);
        assert_eq!(h.len(), 20);
        assert_eq!(&h[..4], &1u32.to_le_bytes());
        assert_eq!(&h[4..12], &0x1000u64.to_le_bytes());
        assert_eq!(&h[12..20], &0x20u64.to_le_bytes());
    }

    #[test]
    fn try_open_requires_armed_collection() {
        let c = CoredumpCollector::new("q6", Arc::new(Pattern));
        assert!(matches!(c.try_open(), Err(RprocError::ResourceUnavailable(_))));
        assert!(matches!(c.collect(Vec::new()), Err(RprocError::Coredump(_))));
    }

    #[test]
    fn registry_is_bounded() {
        let reg = CollectorRegistry::new();
        for i in 0..MAX_COLLECTORS {
            let c = Arc::new(CoredumpCollector::new(format!("c{i}"), Arc::new(Pattern)));
            assert_eq!(reg.register(c).unwrap(), i);
        }
        let extra = Arc::new(CoredumpCollector::new("extra", Arc::new(Pattern)));
        assert!(matches!(
            reg.register(extra.clone()),
            Err(RprocError::ResourceUnavailable(_))
        ));
        assert!(reg.unregister(2).is_some());
        assert_eq!(reg.register(extra).unwrap(), 2);
        assert_eq!(reg.get(2).map(|c| c.name().to_owned()), Some("extra".into()));
        assert!(reg.get(MAX_COLLECTORS).is_none());
    }
}
