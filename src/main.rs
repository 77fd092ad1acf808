// CLASSIFICATION: COMMUNITY
// Filename: main.rs v1.1
// Date Modified: 2026-10-17
// Author: Lukas Bower

//! Entry point for the `rprocctl` binary.

use rproc_ctl::cli;

fn main() {
    env_logger::init();
    if let Err(err) = cli::run() {
        eprintln!("Error: {}", err);
        std::process::exit(1);
    }
}
