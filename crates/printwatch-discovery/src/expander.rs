// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// IPP System expansion: enumerate the member printers of a system object and
// fetch each one.

use tracing::{debug, info, instrument, warn};

use printwatch_core::error::Result;
use printwatch_core::types::{ObjectKind, PrinterDestination, ServiceRecord, OPT_DEVICE_URI, OPT_UUID};

use crate::fetcher::AttributeFetcher;

/// Expand the system behind `record` into its member printers.
///
/// Fails only when the member listing itself cannot be obtained or is
/// invalid.  A member whose query fails is logged and left out; the rest are
/// still attempted.
#[instrument(skip(fetcher, record), fields(system = %record.name))]
pub async fn expand_system(
    fetcher: &AttributeFetcher,
    record: &ServiceRecord,
    system_uri: &str,
) -> Result<Vec<PrinterDestination>> {
    let pairs = fetcher.client().get_printers(system_uri).await?.into_pairs()?;
    let total = pairs.len();
    debug!(members = total, "expanding system");

    let mut members = Vec::with_capacity(total);
    for (index, (name, uri)) in pairs.into_iter().enumerate() {
        let mut candidate = PrinterDestination::new(name);
        if let Some(uuid) = &record.txt.uuid {
            candidate.options.insert(OPT_UUID, uuid.as_str());
        }
        candidate.options.insert(OPT_DEVICE_URI, uri.as_str());

        match fetcher.fetch_into(&mut candidate, &uri, ObjectKind::Printer).await {
            Ok(()) => members.push(candidate),
            Err(e) => warn!(
                member = %candidate.name,
                "member {}/{} failed: {e}",
                index + 1,
                total
            ),
        }
    }

    info!(found = members.len(), of = total, "system expanded");
    Ok(members)
}
