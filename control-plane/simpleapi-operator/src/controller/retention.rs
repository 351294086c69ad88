//! Which versions stay live, which go, and whether the desired one must be
//! created. Pure; recomputed from store contents on every pass.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use crate::version::Version;

/// A workload found in the store for the application.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObservedVersion {
    pub version: Version,
    /// Name of the workload object as stored
    pub workload: String,
    /// `lastDeployedAt` annotation, when present and numeric
    pub deployed_at: Option<i64>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Classification {
    /// The desired version has no workload yet
    pub create: bool,
    /// At most `limit` versions, oldest first
    pub keep: Vec<Version>,
    /// Workloads to delete, oldest first
    pub evict: Vec<ObservedVersion>,
}

impl Classification {
    pub fn keeps(&self, version: &Version) -> bool {
        self.keep.iter().any(|v| v == version)
    }
}

struct Candidate {
    version: Version,
    deployed_at: Option<i64>,
    observed: Option<ObservedVersion>,
}

impl Candidate {
    fn sort_key(&self) -> (crate::version::Rank, i64, &str) {
        (
            self.version.rank(),
            self.deployed_at.unwrap_or(i64::MIN),
            self.version.as_str(),
        )
    }
}

pub fn classify(
    existing: &[ObservedVersion],
    desired: &Version,
    desired_deployed_at: i64,
    limit: usize,
) -> Classification {
    let limit = limit.max(1);

    // One logical entry per identifier; extra workloads carrying the same
    // identifier are evicted outright, the newest one stands for the version.
    let mut by_id: BTreeMap<&str, ObservedVersion> = BTreeMap::new();
    let mut duplicates: Vec<ObservedVersion> = Vec::new();
    for obs in existing {
        match by_id.entry(obs.version.as_str()) {
            Entry::Vacant(slot) => {
                slot.insert(obs.clone());
            }
            Entry::Occupied(mut slot) => {
                let cur = slot.get_mut();
                let newer = obs.deployed_at.unwrap_or(i64::MIN)
                    > cur.deployed_at.unwrap_or(i64::MIN);
                if newer {
                    duplicates.push(std::mem::replace(cur, obs.clone()));
                } else {
                    duplicates.push(obs.clone());
                }
            }
        }
    }

    let create = !by_id.contains_key(desired.as_str());
    let mut candidates: Vec<Candidate> = by_id
        .into_values()
        .map(|o| Candidate {
            version: o.version.clone(),
            deployed_at: o.deployed_at,
            observed: Some(o),
        })
        .collect();
    if create {
        candidates.push(Candidate {
            version: desired.clone(),
            deployed_at: Some(desired_deployed_at),
            observed: None,
        });
    }
    candidates.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));

    let total = candidates.len();
    let start = total.saturating_sub(limit);
    let mut keep_idx: Vec<usize> = (start..total).collect();
    if let Some(pos) = candidates.iter().position(|c| &c.version == desired) {
        if pos < start {
            // Rollback: the requested version displaces the oldest of the window.
            keep_idx.remove(0);
            keep_idx.insert(0, pos);
        }
    }

    let keep = keep_idx
        .iter()
        .map(|&i| candidates[i].version.clone())
        .collect();
    let mut evict: Vec<ObservedVersion> = candidates
        .into_iter()
        .enumerate()
        .filter(|(i, _)| !keep_idx.contains(i))
        .filter_map(|(_, c)| c.observed)
        .collect();
    evict.extend(duplicates);

    Classification {
        create,
        keep,
        evict,
    }
}
