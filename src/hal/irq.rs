// CLASSIFICATION: COMMUNITY
// Filename: irq.rs v0.2
// Author: Lukas Bower
// Date Modified: 2026-10-17

//! Inbound interrupt lines from the remote core.
//!
//! Each line is an [`EventChannel`]: an edge-triggered source that can be
//! enabled or disabled. Firing a channel never touches controller state
//! directly; it posts a [`CoreEvent`] onto the owning controller's queue and
//! the controller's pump thread applies it under the controller lock.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Mutex;

use log::{debug, trace};

/// Which interrupt line an event arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Firmware finished booting.
    Ready,
    /// Boot-time proxy resources may be released.
    Handover,
    /// Watchdog bite, or stop acknowledgement when the core is not running.
    Watchdog,
    /// Firmware reported a fatal error.
    Fatal,
    /// Graceful stop acknowledged.
    StopAck,
    /// Child partition spawn acknowledged.
    SpawnAck,
}

impl EventKind {
    /// Interrupt names as they appear in board descriptions.
    pub fn irq_name(self) -> &'static str {
        match self {
            EventKind::Ready => "ready",
            EventKind::Handover => "handover",
            EventKind::Watchdog => "wdog",
            EventKind::Fatal => "fatal",
            EventKind::StopAck => "stop-ack",
            EventKind::SpawnAck => "spawn-ack",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.irq_name())
    }
}

/// One delivered edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreEvent {
    /// Line the edge arrived on.
    pub kind: EventKind,
    /// Per-channel edge counter, starting at 0.
    pub seq: u64,
}

/// Messages consumed by a controller's pump thread.
#[derive(Debug)]
pub(crate) enum PumpMessage {
    Event(CoreEvent),
    Shutdown,
}

/// An interrupt line wrapped as an enable/disable-able notification source.
pub struct EventChannel {
    kind: EventKind,
    enabled: AtomicBool,
    seq: AtomicU64,
    queue: Mutex<Sender<PumpMessage>>,
}

impl fmt::Debug for EventChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventChannel")
            .field("kind", &self.kind)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl EventChannel {
    pub(crate) fn new(kind: EventKind, enabled: bool, queue: Sender<PumpMessage>) -> Self {
        Self {
            kind,
            enabled: AtomicBool::new(enabled),
            seq: AtomicU64::new(0),
            queue: Mutex::new(queue),
        }
    }

    /// Line this channel wraps.
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Whether edges are currently delivered.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Start delivering edges.
    pub fn enable(&self) {
        if !self.enabled.swap(true, Ordering::AcqRel) {
            debug!("irq {} enabled", self.kind);
        }
    }

    /// Drop edges until re-enabled.
    pub fn disable(&self) {
        if self.enabled.swap(false, Ordering::AcqRel) {
            debug!("irq {} disabled", self.kind);
        }
    }

    /// Raise the line. Returns `false` if the channel is disabled or the
    /// owning controller is gone; the edge is dropped in both cases.
    pub fn fire(&self) -> bool {
        if !self.is_enabled() {
            trace!("irq {} masked, edge dropped", self.kind);
            return false;
        }
        let ev = CoreEvent {
            kind: self.kind,
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
        };
        let queue = match self.queue.lock() {
            Ok(q) => q,
            Err(poisoned) => poisoned.into_inner(),
        };
        queue.send(PumpMessage::Event(ev)).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::channel;

    #[test]
    fn disabled_channel_drops_edges() {
        let (tx, rx) = channel();
        let ch = EventChannel::new(EventKind::Handover, false, tx);
        assert!(!ch.fire());
        ch.enable();
        assert!(ch.fire());
        match rx.try_recv() {
            Ok(PumpMessage::Event(ev)) => assert_eq!(ev.kind, EventKind::Handover),
            other => panic!("unexpected {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn sequence_numbers_increase() {
        let (tx, rx) = channel();
        let ch = EventChannel::new(EventKind::Ready, true, tx);
        ch.fire();
        ch.fire();
        let seqs: Vec<u64> = rx
            .try_iter()
            .filter_map(|m| match m {
                PumpMessage::Event(ev) => Some(ev.seq),
                PumpMessage::Shutdown => None,
            })
            .collect();
        assert_eq!(seqs, vec![0, 1]);
    }
}
