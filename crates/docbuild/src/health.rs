//! Daemon health assessment for status surfaces.
//!
//! The HTTP layer serializes a [`Health`] snapshot; the thresholds live
//! here so they are testable without a server.

use serde::{Deserialize, Serialize};

/// Queue depth beyond which the daemon reports degraded.
pub const QUEUE_DEEP: usize = 50;

/// Queue depth beyond which the degradation message escalates.
pub const QUEUE_NEARLY_FULL: usize = 100;

/// Point-in-time health of the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Health {
    pub degraded: bool,
    /// Human-readable degradation reasons; empty when healthy.
    pub reasons: Vec<String>,
    pub queued: usize,
    pub active: usize,
    pub state_loaded: bool,
    pub discovery_errors: usize,
}

/// Fold the raw signals into a health verdict.
pub fn assess(
    queued: usize,
    active: usize,
    discovery_errors: usize,
    state_loaded: bool,
) -> Health {
    let mut reasons = Vec::new();

    if queued > QUEUE_NEARLY_FULL {
        reasons.push(format!("build queue is getting full ({queued} queued)"));
    } else if queued > QUEUE_DEEP {
        reasons.push(format!("build queue is deep ({queued} queued)"));
    }
    if discovery_errors > 0 {
        reasons.push(format!("last discovery had {discovery_errors} error(s)"));
    }
    if !state_loaded {
        reasons.push("daemon state is not loaded".to_string());
    }

    Health {
        degraded: !reasons.is_empty(),
        reasons,
        queued,
        active,
        state_loaded,
        discovery_errors,
    }
}
