// CLASSIFICATION: COMMUNITY
// Filename: coredump_stream.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-17

mod common;

use std::io::Read;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rproc_ctl::coredump::{CollectOutcome, CollectorRegistry, CoredumpCollector, DumpRegion, MAX_COLLECTORS};
use rproc_ctl::error::RprocError;
use rproc_ctl::hal::EventKind;
use rproc_ctl::remote::{MemoryRegion, RemoteMemory};
use rproc_ctl::sim::{SimBehavior, SimMemory, SimSoc};
use rproc_ctl::State;
use serial_test::serial;

use common::{core_cfg, init_logging, wait_for};

fn memory() -> Arc<SimMemory> {
    let mem = Arc::new(SimMemory::new(MemoryRegion {
        phys: 0x1000,
        reloc: 0x1000,
        size: 0x40,
    }));
    let bytes: Vec<u8> = (0..0x40).collect();
    mem.write(0, &bytes).unwrap();
    mem
}

fn regions() -> Vec<DumpRegion> {
    vec![
        DumpRegion { addr: 0x1000, size: 0x10 },
        DumpRegion { addr: 0x1020, size: 0x08 },
    ]
}

#[test]
#[serial]
fn stream_serves_header_then_regions_one_at_a_time() {
    init_logging();
    let mem = memory();
    let collector = Arc::new(CoredumpCollector::with_timeout(
        "adsp",
        mem.clone(),
        Duration::from_secs(5),
    ));
    let producer = {
        let c = collector.clone();
        thread::spawn(move || c.collect(regions()))
    };

    let mut reader = collector.open(Duration::from_secs(1)).unwrap();
    assert_eq!(reader.len(), 4 + 2 * 16 + 0x18);
    let mut out = Vec::new();
    reader.read_to_end(&mut out).unwrap();
    drop(reader);
    assert_eq!(producer.join().unwrap().unwrap(), CollectOutcome::Completed);

    assert_eq!(&out[..4], &2u32.to_le_bytes());
    assert_eq!(&out[4..12], &0x1000u64.to_le_bytes());
    assert_eq!(&out[12..20], &0x10u64.to_le_bytes());
    assert_eq!(&out[20..28], &0x1020u64.to_le_bytes());
    assert_eq!(&out[28..36], &0x08u64.to_le_bytes());
    let body = &out[36..];
    assert_eq!(&body[..0x10], &(0x00u8..0x10).collect::<Vec<_>>()[..]);
    assert_eq!(&body[0x10..], &(0x20u8..0x28).collect::<Vec<_>>()[..]);

    assert_eq!(mem.peak_mapped(), 1);
    assert!(!collector.is_armed());
}

#[test]
#[serial]
fn open_fails_when_nothing_is_armed() {
    init_logging();
    let collector = CoredumpCollector::new("adsp", memory());
    assert!(matches!(
        collector.try_open(),
        Err(RprocError::ResourceUnavailable(_))
    ));
    assert!(matches!(
        collector.open(Duration::from_millis(30)),
        Err(RprocError::Coredump(_))
    ));
    assert!(collector.collect(Vec::new()).is_err());
}

#[test]
#[serial]
fn expired_collection_cuts_the_stream_short() {
    init_logging();
    let collector = Arc::new(CoredumpCollector::with_timeout(
        "adsp",
        memory(),
        Duration::from_millis(100),
    ));
    let producer = {
        let c = collector.clone();
        thread::spawn(move || c.collect(regions()))
    };

    let mut reader = collector.open(Duration::from_secs(1)).unwrap();
    let mut head = [0u8; 4];
    reader.read_exact(&mut head).unwrap();
    assert_eq!(producer.join().unwrap().unwrap(), CollectOutcome::Expired);

    let mut rest = Vec::new();
    reader.read_to_end(&mut rest).unwrap();
    assert!(4 + (rest.len() as u64) < reader.len());
    assert!(!collector.is_armed());
}

#[test]
#[serial]
fn unread_collection_expires() {
    init_logging();
    let collector = CoredumpCollector::with_timeout("adsp", memory(), Duration::from_millis(50));
    assert_eq!(collector.collect(regions()).unwrap(), CollectOutcome::Expired);
    assert!(collector.try_open().is_err());
}

#[test]
#[serial]
fn registry_is_bounded() {
    init_logging();
    let registry = CollectorRegistry::new();
    let mem = memory();
    for i in 0..MAX_COLLECTORS {
        let c = Arc::new(CoredumpCollector::new(format!("core{i}"), mem.clone()));
        assert_eq!(registry.register(c).unwrap(), i);
    }
    let extra = Arc::new(CoredumpCollector::new("extra", mem.clone()));
    assert!(matches!(
        registry.register(extra.clone()),
        Err(RprocError::ResourceUnavailable(_))
    ));
    assert_eq!(registry.unregister(2).unwrap().name(), "core2");
    assert_eq!(registry.register(extra).unwrap(), 2);
    assert_eq!(registry.get(2).unwrap().name(), "extra");
    assert_eq!(registry.len(), MAX_COLLECTORS);
}

#[test]
#[serial]
fn crashed_core_memory_can_be_dumped() {
    init_logging();
    let soc = SimSoc::new();
    let cfg = core_cfg("adsp");
    let h = soc.build_core(&cfg, None, SimBehavior::default()).unwrap();
    let ctl = &h.controller;
    ctl.prepare().unwrap();
    ctl.start(soc.image_for(&cfg), Duration::from_secs(1)).unwrap();
    h.sim.crash(EventKind::Fatal);
    assert!(wait_for(Duration::from_secs(1), || ctl.state() == State::Crashed));

    let region = *ctl.core().region();
    let collector = Arc::new(CoredumpCollector::new(ctl.name(), h.memory.clone()));
    let producer = {
        let c = collector.clone();
        thread::spawn(move || {
            c.collect(vec![DumpRegion {
                addr: region.phys,
                size: region.size,
            }])
        })
    };
    let mut out = Vec::new();
    collector
        .open(Duration::from_secs(1))
        .unwrap()
        .read_to_end(&mut out)
        .unwrap();
    assert_eq!(producer.join().unwrap().unwrap(), CollectOutcome::Completed);
    assert_eq!(out.len() as u64, 20 + region.size);
    assert_eq!(&out[20..24], b"adsp");
}
