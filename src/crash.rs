// CLASSIFICATION: COMMUNITY
// Filename: crash.rs v0.2
// Author: Lukas Bower
// Date Modified: 2026-10-17

//! Crash classification and supervisor notification.

use std::fmt;
use std::sync::{Arc, Mutex};

use log::error;

/// How the remote core went down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CrashKind {
    Watchdog,
    FatalError,
}

impl fmt::Display for CrashKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CrashKind::Watchdog => f.write_str("watchdog"),
            CrashKind::FatalError => f.write_str("fatal error"),
        }
    }
}

/// What the supervisor receives when a core crashes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrashReport {
    pub core: String,
    pub kind: CrashKind,
    pub diagnostic: Option<String>,
}

/// Where the firmware leaves its last words, usually a shared-memory item.
pub trait CrashReasonSource: Send + Sync {
    /// Raw reason bytes, `None` if the item is absent.
    fn read_reason(&self) -> Option<Vec<u8>>;
}

pub type CrashCallback = Box<dyn Fn(&CrashReport) + Send + Sync>;

/// Builds crash reports and forwards them to the registered callback.
pub struct CrashReporter {
    core: String,
    source: Option<Arc<dyn CrashReasonSource>>,
    callback: Mutex<Option<Arc<dyn Fn(&CrashReport) + Send + Sync>>>,
}

impl fmt::Debug for CrashReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CrashReporter")
            .field("core", &self.core)
            .field("has_source", &self.source.is_some())
            .finish()
    }
}

impl CrashReporter {
    pub fn new(core: impl Into<String>, source: Option<Arc<dyn CrashReasonSource>>) -> Self {
        Self {
            core: core.into(),
            source,
            callback: Mutex::new(None),
        }
    }

    pub fn set_callback(&self, cb: CrashCallback) {
        let mut slot = self.callback.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(Arc::from(cb));
    }

    /// Read the diagnostic text and classify the crash.
    pub fn capture(&self, kind: CrashKind) -> CrashReport {
        let diagnostic = self
            .source
            .as_ref()
            .and_then(|s| s.read_reason())
            .and_then(|raw| decode_reason(&raw));
        match &diagnostic {
            Some(msg) => error!("{}: {kind} crash: {msg}", self.core),
            None => error!("{}: {kind} crash, no reason recorded", self.core),
        }
        CrashReport {
            core: self.core.clone(),
            kind,
            diagnostic,
        }
    }

    /// Hand the report to the supervisor. Must not be called with the
    /// controller lock held. The callback may replace itself.
    pub fn deliver(&self, report: &CrashReport) {
        let cb = self
            .callback
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(cb) = cb {
            cb(report);
        }
    }
}

/// Trim trailing NULs and whitespace; empty reasons become `None`.
fn decode_reason(raw: &[u8]) -> Option<String> {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    let text = String::from_utf8_lossy(&raw[..end]);
    let text = text.trim_end();
    (!text.is_empty()).then(|| text.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixed(&'static [u8]);

    impl CrashReasonSource for Fixed {
        fn read_reason(&self) -> Option<Vec<u8>> {
            Some(self.0.to_vec())
        }
    }

    #[test]
    fn reason_is_trimmed_at_nul() {
        assert_eq!(
            decode_reason(b"err_qdi.c:456 PD 1 exited\0\0garbage"),
            Some("err_qdi.c:456 PD 1 exited".into())
        );
        assert_eq!(decode_reason(b"\0\0\0"), None);
        assert_eq!(decode_reason(b"  \n"), None);
    }

    #[test]
    fn capture_and_deliver() {
        let rep = CrashReporter::new("q6", Some(Arc::new(Fixed(b"stack overflow\0"))));
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        rep.set_callback(Box::new(move |r| {
            assert_eq!(r.kind, CrashKind::FatalError);
            h.fetch_add(1, Ordering::SeqCst);
        }));
        let report = rep.capture(CrashKind::FatalError);
        assert_eq!(report.diagnostic.as_deref(), Some("stack overflow"));
        rep.deliver(&report);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn callback_may_replace_itself() {
        let rep = Arc::new(CrashReporter::new("q6", None));
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        {
            let weak = Arc::downgrade(&rep);
            let first = first.clone();
            let second = second.clone();
            rep.set_callback(Box::new(move |_| {
                first.fetch_add(1, Ordering::SeqCst);
                if let Some(rep) = weak.upgrade() {
                    let second = second.clone();
                    rep.set_callback(Box::new(move |_| {
                        second.fetch_add(1, Ordering::SeqCst);
                    }));
                }
            }));
        }
        let report = rep.capture(CrashKind::Watchdog);
        rep.deliver(&report);
        rep.deliver(&report);
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }
}
