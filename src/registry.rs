// CLASSIFICATION: COMMUNITY
// Filename: registry.rs v0.2
// Author: Lukas Bower
// Date Modified: 2026-10-17

//! Name-indexed table of lifecycle controllers.
//!
//! The registry is an explicit object owned by the supervisor. Parents must
//! be registered before their children.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use log::info;

use crate::controller::LifecycleController;
use crate::error::{Result, RprocError};

#[derive(Debug, Default)]
pub struct CoreRegistry {
    cores: Mutex<BTreeMap<String, Arc<LifecycleController>>>,
}

impl CoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, ctl: Arc<LifecycleController>) -> Result<()> {
        let name = ctl.name().to_owned();
        let mut cores = self.cores.lock()?;
        if cores.contains_key(&name) {
            return Err(RprocError::ResourceUnavailable(format!(
                "core {name} already registered"
            )));
        }
        if let Some(parent) = ctl.core().parent() {
            if !cores.contains_key(parent.name()) {
                return Err(RprocError::ResourceUnavailable(format!(
                    "core {name}: parent {} not registered",
                    parent.name()
                )));
            }
        }
        info!("core {name} registered");
        cores.insert(name, ctl);
        Ok(())
    }

    /// Remove a core. A parent with registered children cannot be removed.
    pub fn unregister(&self, name: &str) -> Result<Arc<LifecycleController>> {
        let mut cores = self.cores.lock()?;
        let has_children = cores
            .values()
            .any(|c| c.core().parent().map_or(false, |p| p.name() == name));
        if has_children {
            return Err(RprocError::ResourceUnavailable(format!(
                "core {name} still has children"
            )));
        }
        let ctl = cores
            .remove(name)
            .ok_or_else(|| RprocError::ResourceUnavailable(format!("core {name} not registered")))?;
        info!("core {name} unregistered");
        Ok(ctl)
    }

    pub fn get(&self, name: &str) -> Option<Arc<LifecycleController>> {
        self.cores.lock().ok()?.get(name).cloned()
    }

    pub fn children_of(&self, parent: &str) -> Vec<Arc<LifecycleController>> {
        match self.cores.lock() {
            Ok(cores) => cores
                .values()
                .filter(|c| c.core().parent().map_or(false, |p| p.name() == parent))
                .cloned()
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.cores
            .lock()
            .map(|c| c.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.cores.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
