// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Reconciliation of discovered destinations with the local destination list.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use printwatch_core::types::{PrinterDestination, OPT_SANITIZE_NAME};

/// Merge discovered destinations into the local list.
///
/// Discovered entries are taken in the order given (browsers in registry
/// order, then discovery order); the first entry for a name wins.  A
/// discovered entry that shares its name with a local one takes the local
/// `is_default` and `instance` and any local options it does not already
/// carry.  Local entries nobody matched are appended in their original order.
pub fn merge_destinations<'a>(
    local: &[PrinterDestination],
    discovered: impl IntoIterator<Item = &'a PrinterDestination>,
) -> Vec<PrinterDestination> {
    let mut unmatched: HashMap<&str, usize> = HashMap::with_capacity(local.len());
    for (index, dest) in local.iter().enumerate() {
        unmatched.entry(dest.name.as_str()).or_insert(index);
    }

    let mut emitted: HashSet<String> = HashSet::new();
    let mut merged = Vec::with_capacity(local.len());
    let mut duplicates = 0usize;

    for candidate in discovered {
        if emitted.contains(&candidate.name) {
            duplicates += 1;
            continue;
        }
        let mut dest = candidate.clone();
        if let Some(index) = unmatched.remove(dest.name.as_str()) {
            absorb_local(&mut dest, &local[index]);
        }
        emitted.insert(dest.name.clone());
        merged.push(dest);
    }

    let discovered_count = merged.len();
    for dest in local {
        if emitted.contains(&dest.name) {
            continue;
        }
        emitted.insert(dest.name.clone());
        merged.push(dest.clone());
    }

    debug!(
        discovered = discovered_count,
        local_only = merged.len() - discovered_count,
        duplicates,
        "destinations merged"
    );
    merged
}

fn absorb_local(dest: &mut PrinterDestination, local: &PrinterDestination) {
    dest.is_default = local.is_default;
    dest.instance = local.instance.clone();
    for (name, value) in local.options.iter() {
        dest.options.insert_if_absent(name, value);
    }
    dest.options.insert(OPT_SANITIZE_NAME, "TRUE");
}
