// src/engine/error_slot.rs

//! Write-once-wins holder for the first fatal error of a run.

use std::sync::OnceLock;

use tracing::{debug, error};

use crate::errors::{FleetError, RunFailure};

/// First fatal error observed by any dispatcher or worker-exit observer.
///
/// Setting is an atomic set-if-empty; once set the slot is never
/// overwritten. Later errors are logged and discarded.
#[derive(Debug, Default)]
pub struct ErrorSlot {
    slot: OnceLock<RunFailure>,
}

impl ErrorSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to latch `failure`. Returns true if this call won.
    pub fn record(&self, failure: RunFailure) -> bool {
        let message = failure.message.clone();
        match self.slot.set(failure) {
            Ok(()) => {
                error!(error = %message, "fatal run error recorded");
                true
            }
            Err(_) => {
                debug!(error = %message, "fatal error discarded; slot already set");
                false
            }
        }
    }

    pub fn record_error(&self, err: &FleetError) -> bool {
        self.record(RunFailure::from(err))
    }

    pub fn get(&self) -> Option<&RunFailure> {
        self.slot.get()
    }

    pub fn is_set(&self) -> bool {
        self.slot.get().is_some()
    }
}
