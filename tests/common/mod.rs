// CLASSIFICATION: COMMUNITY
// Filename: mod.rs · tests/common v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-17

#![allow(dead_code)]

use std::time::{Duration, Instant};

use rproc_ctl::config::{BoardConfig, CoreConfig};

/// Trusted-boot host with one spawned partition, a sequencer-booted power
/// island and a halt/reset core.
pub const BOARD: &str = r#"
    [[core]]
    name = "adsp"
    firmware = "adsp.mdt"
    requires_force_stop = true
    memory = { phys = 0x4AB00000, reloc = 0x4AB00000, size = 0x1000 }
    boot = { method = "trusted", peripheral_id = 6, reset_cmd_id = 0x14 }

    [[core]]
    name = "adsp-pd1"
    parent = "adsp"
    firmware = "adsp_pd1.mdt"
    memory = { phys = 0x4AC00000, reloc = 0x4AC00000, size = 0x800 }
    boot = { method = "spawn" }

    [[core]]
    name = "cdsp"
    firmware = "cdsp.mdt"
    memory = { phys = 0x8B000000, reloc = 0x4B000000, size = 0x1000 }
    boot = { method = "sequencer" }
    family = { recipe = "recipe-b", mem_banks = 20 }

    [[core]]
    name = "wcss"
    firmware = "wcss.mdt"
    memory = { phys = 0x4D000000, reloc = 0x4D000000, size = 0x1000 }
    boot = { method = "sequencer" }
    family = { recipe = "recipe-a", halt_ports = [0, 256], aux_timeout = 200 }
"#;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn board() -> BoardConfig {
    BoardConfig::from_toml_str(BOARD).expect("test board parses")
}

pub fn core_cfg(name: &str) -> CoreConfig {
    board().core(name).cloned().expect("core in test board")
}

/// Spin until `cond` holds or `timeout` passes; returns the final result.
pub fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if cond() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}
