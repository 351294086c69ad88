use tracing::{debug, trace};

use crate::crd::SimpleApiStatus;
use crate::version::Version;

pub const PHASE_READY: &str = "Ready";
pub const PHASE_FAILED: &str = "Failed";

pub fn ready(
    now: String,
    generation: Option<i64>,
    active: &Version,
    keep: &[Version],
    route_name: &str,
) -> SimpleApiStatus {
    let retained: Vec<String> =
        keep.iter().map(|v| v.as_str().to_string()).collect();
    SimpleApiStatus {
        phase: Some(PHASE_READY.to_string()),
        message: Some(format!("routing to {}", retained.join(", "))),
        active_version: Some(active.as_str().to_string()),
        retained_versions: retained,
        route_name: Some(route_name.to_string()),
        observed_generation: generation,
        last_updated: Some(now),
    }
}

/// Failed status for a spec that cannot be materialized. Fields describing
/// what is still live are carried over from `previous`, so a merge patch of
/// this value leaves no stale data behind.
pub fn failed(
    now: String,
    generation: Option<i64>,
    message: String,
    previous: Option<&SimpleApiStatus>,
) -> SimpleApiStatus {
    let prev = previous.cloned().unwrap_or_default();
    SimpleApiStatus {
        phase: Some(PHASE_FAILED.to_string()),
        message: Some(message),
        observed_generation: generation,
        last_updated: Some(now),
        ..prev
    }
}

/// True when `desired` differs from `current` in anything but lastUpdated.
pub fn should_patch_status(
    current: Option<&SimpleApiStatus>,
    desired: &SimpleApiStatus,
) -> bool {
    match current {
        None => {
            debug!("should_patch_status: no current status, patching");
            true
        }
        Some(cur) => {
            let differs = normalize_status(cur) != normalize_status(desired);
            if differs {
                debug!(?cur, ?desired, "should_patch_status: status differs, patching");
            } else {
                trace!("should_patch_status: status identical, skipping patch");
            }
            differs
        }
    }
}

fn normalize_status(s: &SimpleApiStatus) -> SimpleApiStatus {
    SimpleApiStatus {
        last_updated: None,
        ..s.clone()
    }
}
