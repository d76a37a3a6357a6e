//! Recording sync invoker.

use parking_lot::Mutex;
use snapcycle_core::{SnapError, SnapResult, SyncInvoker, SyncRequest};
use std::collections::BTreeMap;

/// How a tier's sync should misbehave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Fail without touching the target.
    Fail,
    /// Run the inner sync, then report failure, as if the tool died late.
    Interrupt,
}

/// Wraps another invoker, recording every request.
///
/// Faults can be injected per tier to simulate a failing or interrupted
/// sync tool.
#[derive(Debug, Default)]
pub struct RecordingSync<I> {
    inner: I,
    calls: Mutex<Vec<SyncRequest>>,
    faults: Mutex<BTreeMap<String, Fault>>,
}

impl<I: SyncInvoker> RecordingSync<I> {
    /// Wraps `inner`.
    pub fn new(inner: I) -> Self {
        Self {
            inner,
            calls: Mutex::new(Vec::new()),
            faults: Mutex::new(BTreeMap::new()),
        }
    }

    /// Injects a fault for every later sync of `tier`.
    pub fn set_fault(&self, tier: &str, fault: Fault) {
        self.faults.lock().insert(tier.to_string(), fault);
    }

    /// Removes all injected faults.
    pub fn clear_faults(&self) {
        self.faults.lock().clear();
    }

    /// Returns every request seen so far.
    pub fn calls(&self) -> Vec<SyncRequest> {
        self.calls.lock().clone()
    }

    /// Returns the requests made for one tier.
    pub fn calls_for(&self, tier: &str) -> Vec<SyncRequest> {
        self.calls
            .lock()
            .iter()
            .filter(|r| r.tier == tier)
            .cloned()
            .collect()
    }

    /// Forgets recorded requests.
    pub fn reset(&self) {
        self.calls.lock().clear();
    }
}

impl<I: SyncInvoker> SyncInvoker for RecordingSync<I> {
    fn sync(&self, request: &SyncRequest) -> SnapResult<()> {
        self.calls.lock().push(request.clone());
        let fault = self.faults.lock().get(&request.tier).copied();
        match fault {
            None => self.inner.sync(request),
            Some(Fault::Fail) => Err(injected(request)),
            Some(Fault::Interrupt) => {
                self.inner.sync(request)?;
                Err(injected(request))
            }
        }
    }
}

fn injected(request: &SyncRequest) -> SnapError {
    SnapError::sync_failed(&request.tier, "recording", Some(20), "injected fault")
}
