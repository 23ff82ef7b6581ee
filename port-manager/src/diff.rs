//! Diff computer (spec §4.F): given two consecutive port-status tables,
//! produces added / updated / removed sets, sorted by local port ascending
//! for determinism.

use port_manager_core::ports::PortMap;
use port_manager_core::{Diff, PortStatus};

pub fn compute(old: &PortMap<PortStatus>, new: &PortMap<PortStatus>) -> Diff {
    let mut added = Vec::new();
    let mut updated = Vec::new();
    let mut removed = Vec::new();

    for (port, status) in new {
        match old.get(port) {
            None => added.push(status.clone()),
            Some(prev) if prev != status => updated.push(status.clone()),
            Some(_) => {}
        }
    }
    for port in old.keys() {
        if !new.contains_key(port) {
            removed.push(*port);
        }
    }

    added.sort_by_key(|s| s.local_port);
    updated.sort_by_key(|s| s.local_port);
    removed.sort_unstable();

    Diff {
        added,
        updated,
        removed,
    }
}
