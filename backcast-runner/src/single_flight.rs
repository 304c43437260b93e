//! Single-flight registry: at most one in-flight job per fingerprint.
//!
//! Later holders of the same fingerprint wait for the earlier guard to drop,
//! then run on their own. Nothing is shared between them but the wait.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use backcast_core::JobFingerprint;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Debug, Default)]
pub struct SingleFlight {
    slots: Mutex<HashMap<JobFingerprint, Arc<AsyncMutex<()>>>>,
}

/// Held for the duration of one job.
pub struct FlightGuard {
    _guard: OwnedMutexGuard<()>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other job with `fingerprint` is in flight.
    pub async fn acquire(&self, fingerprint: &JobFingerprint) -> FlightGuard {
        let slot = {
            // the std mutex is never held across an await
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            slots.retain(|_, slot| Arc::strong_count(slot) > 1);
            Arc::clone(slots.entry(fingerprint.clone()).or_default())
        };
        FlightGuard {
            _guard: slot.lock_owned().await,
        }
    }

    /// Fingerprints currently tracked, idle ones included until the next acquire.
    pub fn tracked(&self) -> usize {
        self.slots.lock().map(|s| s.len()).unwrap_or(0)
    }
}
