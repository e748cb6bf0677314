// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Attribute fetcher: turns a resolved service into destination candidates.
//
// Printer records produce one candidate.  System records have their own
// attributes fetched first; only when that succeeds are the member printers
// enumerated (see `expander`).

use std::sync::Arc;

use tracing::{debug, warn};

use printwatch_core::error::{PrintwatchError, Result};
use printwatch_core::types::{
    ObjectKind, PrinterDestination, ServiceRecord, OPT_DEVICE_URI, OPT_HOSTNAME, OPT_LOCATION,
    OPT_MORE_INFO, OPT_OBJ_TYPE, OPT_UUID, UNKNOWN_VALUE,
};

use crate::expander::expand_system;
use crate::ipp_client::{requested_attributes, AttributeClient};

/// Queries resolved endpoints and builds `PrinterDestination`s.
#[derive(Clone)]
pub struct AttributeFetcher {
    client: Arc<dyn AttributeClient>,
    include_system_objects: bool,
}

impl AttributeFetcher {
    pub fn new(client: Arc<dyn AttributeClient>, include_system_objects: bool) -> Self {
        Self {
            client,
            include_system_objects,
        }
    }

    pub fn client(&self) -> &dyn AttributeClient {
        self.client.as_ref()
    }

    /// Collect every destination reachable through `record`.
    ///
    /// Never fails: a record that cannot be queried yields nothing and the
    /// failure is logged.
    pub async fn collect(&self, record: &ServiceRecord) -> Vec<PrinterDestination> {
        let kind = record.object_kind();
        let uri = record.device_uri();
        let mut destination = seed_destination(record);

        if let Err(e) = self.fetch_into(&mut destination, &uri, kind).await {
            log_skipped(&record.name, &e);
            return Vec::new();
        }

        match kind {
            ObjectKind::Printer => vec![destination],
            ObjectKind::System => {
                let mut out = Vec::new();
                if self.include_system_objects {
                    out.push(destination);
                }
                match expand_system(self, record, &uri).await {
                    Ok(members) => out.extend(members),
                    Err(e) => log_skipped(&record.name, &e),
                }
                out
            }
        }
    }

    /// Query `uri` and copy the standard attributes for `kind` into
    /// `destination`.
    ///
    /// A queried attribute the endpoint did not return is recorded as
    /// `unknown` unless a value was already seeded for it.
    pub async fn fetch_into(
        &self,
        destination: &mut PrinterDestination,
        uri: &str,
        kind: ObjectKind,
    ) -> Result<()> {
        let attrs = self.client.get_attributes(uri, kind).await?;

        destination.options.insert(OPT_OBJ_TYPE, kind.label());
        for name in requested_attributes(kind) {
            match attrs.get(*name) {
                Some(value) => destination.options.insert(*name, value.as_str()),
                None => {
                    destination.options.insert_if_absent(*name, UNKNOWN_VALUE);
                }
            }
        }

        debug!(
            name = %destination.name,
            uri,
            options = destination.options.len(),
            "attributes collected"
        );
        Ok(())
    }
}

/// Build the candidate for a record from what its TXT data already says.
pub fn seed_destination(record: &ServiceRecord) -> PrinterDestination {
    let mut destination = PrinterDestination::new(record.name.clone());
    let options = &mut destination.options;

    if let Some(uuid) = &record.txt.uuid {
        options.insert(OPT_UUID, uuid.as_str());
    }
    options.insert(OPT_DEVICE_URI, record.device_uri());
    options.insert(OPT_MORE_INFO, record.more_info_uri());
    if let Some(location) = record.txt.location.as_deref().filter(|l| !l.is_empty()) {
        options.insert(OPT_LOCATION, location);
    }
    options.insert(OPT_HOSTNAME, record.uri_host());
    destination
}

pub(crate) fn log_skipped(name: &str, error: &PrintwatchError) {
    if error.is_cancelled() {
        debug!(name, "query cancelled");
    } else {
        warn!(name, error = %error, "skipping endpoint");
    }
}
