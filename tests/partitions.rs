// CLASSIFICATION: COMMUNITY
// Filename: partitions.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-17

mod common;

use std::time::Duration;

use rproc_ctl::error::RprocError;
use rproc_ctl::registry::CoreRegistry;
use rproc_ctl::sim::{SimBehavior, SimSoc};
use rproc_ctl::State;
use serial_test::serial;

use common::{core_cfg, init_logging};

#[test]
#[serial]
fn child_partition_spawns_through_parent() {
    init_logging();
    let soc = SimSoc::new();
    let host_cfg = core_cfg("adsp");
    let pd_cfg = core_cfg("adsp-pd1");
    let host = soc.build_core(&host_cfg, None, SimBehavior::default()).unwrap();
    let pd = soc
        .build_core(&pd_cfg, Some(&host.controller), SimBehavior::default())
        .unwrap();

    assert!(pd.controller.core().is_child());
    assert_eq!(
        pd.controller.core().parent().map(|p| p.name().to_owned()),
        Some("adsp".to_owned())
    );
    assert!(matches!(
        host.controller.request_spawn(Duration::from_millis(10)),
        Err(RprocError::NotChild)
    ));

    host.controller.prepare().unwrap();
    host.controller
        .start(soc.image_for(&host_cfg), Duration::from_secs(1))
        .unwrap();

    pd.controller.prepare().unwrap();
    pd.controller
        .start(soc.image_for(&pd_cfg), Duration::from_secs(1))
        .unwrap();
    assert_eq!(pd.controller.state(), State::Running);
    let spawn = pd.controller.spawn_doorbell().unwrap();
    assert_eq!(spawn.raise_count(), 1);
    assert_eq!(spawn.clear_count(), 1);

    // Children are always stopped gracefully and share the host's power.
    assert!(!pd.controller.shutdown(Duration::from_secs(1)).unwrap());
    assert_eq!(pd.controller.stop_doorbell().unwrap().clear_count(), 1);
    assert_eq!(host.controller.state(), State::Running);

    host.controller.shutdown(Duration::from_secs(1)).unwrap();
    assert_eq!(host.controller.state(), State::Unprepared);
}

#[test]
#[serial]
fn spawn_timeout_clears_doorbell() {
    init_logging();
    let soc = SimSoc::new();
    let host_cfg = core_cfg("adsp");
    let pd_cfg = core_cfg("adsp-pd1");
    let host = soc.build_core(&host_cfg, None, SimBehavior::default()).unwrap();
    let behavior = SimBehavior {
        spawn_ack_after: None,
        ..SimBehavior::default()
    };
    let pd = soc
        .build_core(&pd_cfg, Some(&host.controller), behavior)
        .unwrap();

    pd.controller.prepare().unwrap();
    let err = pd
        .controller
        .start(soc.image_for(&pd_cfg), Duration::from_millis(200))
        .unwrap_err();
    assert!(matches!(err, RprocError::SpawnTimeout(_)), "{err:?}");
    assert_eq!(pd.controller.state(), State::Booting);
    assert_eq!(pd.controller.spawn_doorbell().unwrap().clear_count(), 1);

    // A bare spawn request times out the same way.
    let err = pd
        .controller
        .request_spawn(Duration::from_millis(50))
        .unwrap_err();
    assert!(matches!(err, RprocError::SpawnTimeout(_)), "{err:?}");
    assert_eq!(pd.controller.spawn_doorbell().unwrap().clear_count(), 2);
}

#[test]
#[serial]
fn registry_tracks_parents_and_children() {
    init_logging();
    let soc = SimSoc::new();
    let host_cfg = core_cfg("adsp");
    let pd_cfg = core_cfg("adsp-pd1");
    let host = soc.build_core(&host_cfg, None, SimBehavior::default()).unwrap();
    let pd = soc
        .build_core(&pd_cfg, Some(&host.controller), SimBehavior::default())
        .unwrap();

    let registry = CoreRegistry::new();
    assert!(registry.register(pd.controller.clone()).is_err());
    registry.register(host.controller.clone()).unwrap();
    registry.register(pd.controller.clone()).unwrap();
    assert!(registry.register(host.controller.clone()).is_err());

    assert_eq!(registry.names(), vec!["adsp", "adsp-pd1"]);
    let children = registry.children_of("adsp");
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].name(), "adsp-pd1");

    assert!(registry.unregister("adsp").is_err());
    registry.unregister("adsp-pd1").unwrap();
    registry.unregister("adsp").unwrap();
    assert!(registry.is_empty());
}
