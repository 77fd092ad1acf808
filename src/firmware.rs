// CLASSIFICATION: COMMUNITY
// Filename: firmware.rs v0.3
// Author: Lukas Bower
// Date Modified: 2026-10-17

//! Firmware images as handed over by the image parser.
//!
//! An image is an entry address plus an ordered list of load segments. The
//! metadata blob is what gets submitted for authentication: it commits to the
//! entry point and to every segment's placement and content hash, so the
//! trusted side can authorise the image without seeing the segment bytes.

use log::{debug, info};
use sha2::{Digest, Sha256};

use crate::error::{Result, RprocError};
use crate::remote::{MemoryRegion, RemoteMemory};

const METADATA_MAGIC: &[u8; 4] = b"RPFW";

/// Contents of one load segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentData {
    /// File bytes; anything past their end up to the segment size is zeroed.
    Bytes(Vec<u8>),
    /// No file backing, the whole segment is zeroed.
    ZeroFill,
}

impl SegmentData {
    fn bytes(&self) -> &[u8] {
        match self {
            SegmentData::Bytes(b) => b,
            SegmentData::ZeroFill => &[],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub addr: u64,
    pub size: u64,
    pub data: SegmentData,
}

impl Segment {
    pub fn bytes(addr: u64, data: Vec<u8>) -> Self {
        Self {
            addr,
            size: data.len() as u64,
            data: SegmentData::Bytes(data),
        }
    }

    pub fn zeroed(addr: u64, size: u64) -> Self {
        Self {
            addr,
            size,
            data: SegmentData::ZeroFill,
        }
    }
}

/// A parsed firmware image, consumed by one `start()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareImage {
    name: String,
    entry: u64,
    segments: Vec<Segment>,
    signature: Option<Vec<u8>>,
}

impl FirmwareImage {
    pub fn new(name: impl Into<String>, entry: u64, segments: Vec<Segment>) -> Self {
        Self {
            name: name.into(),
            entry,
            segments,
            signature: None,
        }
    }

    /// Attach the detached signature over [`digest`](Self::digest).
    pub fn with_signature(mut self, signature: Vec<u8>) -> Self {
        self.signature = Some(signature);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entry(&self) -> u64 {
        self.entry
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn signature(&self) -> Option<&[u8]> {
        self.signature.as_deref()
    }

    /// Sum of all segment sizes.
    pub fn image_size(&self) -> u64 {
        self.segments.iter().map(|s| s.size).sum()
    }

    /// Lowest segment address, used as the link base.
    pub fn min_addr(&self) -> Option<u64> {
        self.segments.iter().map(|s| s.addr).min()
    }

    /// Little-endian header committing to the entry point and every segment.
    pub fn metadata(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16 + self.segments.len() * 48);
        out.extend_from_slice(METADATA_MAGIC);
        out.extend_from_slice(&self.entry.to_le_bytes());
        out.extend_from_slice(&(self.segments.len() as u32).to_le_bytes());
        for seg in &self.segments {
            out.extend_from_slice(&seg.addr.to_le_bytes());
            out.extend_from_slice(&seg.size.to_le_bytes());
            out.extend_from_slice(&Sha256::digest(seg.data.bytes()));
        }
        out
    }

    /// SHA-256 of the metadata blob.
    pub fn digest(&self) -> [u8; 32] {
        Sha256::digest(self.metadata()).into()
    }

    pub fn digest_hex(&self) -> String {
        hex::encode(self.digest())
    }

    /// Blob submitted to the trusted service: `u32` metadata length,
    /// metadata, then the signature bytes if any.
    pub fn auth_blob(&self) -> Vec<u8> {
        let meta = self.metadata();
        let sig = self.signature.as_deref().unwrap_or(&[]);
        let mut out = Vec::with_capacity(4 + meta.len() + sig.len());
        out.extend_from_slice(&(meta.len() as u32).to_le_bytes());
        out.extend_from_slice(&meta);
        out.extend_from_slice(sig);
        out
    }
}

/// Split an [`auth_blob`](FirmwareImage::auth_blob) into metadata and signature.
pub fn split_auth_blob(blob: &[u8]) -> Option<(&[u8], &[u8])> {
    let len_bytes: [u8; 4] = blob.get(..4)?.try_into().ok()?;
    let len = u32::from_le_bytes(len_bytes) as usize;
    let meta = blob.get(4..4 + len)?;
    let sig = blob.get(4 + len..)?;
    Some((meta, sig))
}

/// Copy every segment into `region`. Segment addresses are link addresses
/// relative to the region's relocated base.
pub fn load_segments(
    image: &FirmwareImage,
    region: &MemoryRegion,
    memory: &dyn RemoteMemory,
) -> Result<()> {
    for (i, seg) in image.segments.iter().enumerate() {
        let offset = region.offset_of(seg.addr, seg.size).ok_or_else(|| {
            RprocError::Load(format!(
                "segment {i} at 0x{:x}+0x{:x} outside region 0x{:x}+0x{:x}",
                seg.addr, seg.size, region.reloc, region.size
            ))
        })?;
        let bytes = seg.data.bytes();
        if bytes.len() as u64 > seg.size {
            return Err(RprocError::Load(format!(
                "segment {i} carries {} bytes for a 0x{:x} byte slot",
                bytes.len(),
                seg.size
            )));
        }
        memory.write(offset, bytes)?;
        let tail = seg.size - bytes.len() as u64;
        if tail > 0 {
            memory.fill(offset + bytes.len() as u64, tail, 0)?;
        }
        debug!(
            "segment {i}: 0x{:x} -> phys 0x{:x} ({} bytes, {} zeroed)",
            seg.addr,
            region.phys + offset,
            bytes.len(),
            tail
        );
    }
    info!(
        "{}: loaded {} segments ({} bytes)",
        image.name,
        image.segments.len(),
        image.image_size()
    );
    Ok(())
}
