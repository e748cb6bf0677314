// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Turns announcements into `ServiceRecord`s.

use std::time::Duration;

use chrono::Utc;
use tracing::{debug, instrument};

use printwatch_core::error::{PrintwatchError, Result};
use printwatch_core::types::{Announcement, ResolvedService, ServiceRecord};

use crate::directory::ServiceDirectory;
use crate::txt::parse_txt;

/// Resolve one announcement through the directory.
///
/// Times out after `timeout`; the caller owns cancellation.
#[instrument(skip(directory), fields(name = %announcement.name, service_type = %announcement.service_type))]
pub async fn resolve(
    directory: &dyn ServiceDirectory,
    announcement: &Announcement,
    timeout: Duration,
) -> Result<ServiceRecord> {
    let resolved = tokio::time::timeout(timeout, directory.resolve(announcement))
        .await
        .map_err(|_| {
            PrintwatchError::Resolve(format!(
                "{} timed out after {}ms",
                announcement.name,
                timeout.as_millis()
            ))
        })??;

    let record = record_from_resolved(resolved);
    debug!(
        hostname = %record.hostname,
        port = record.port,
        kind = ?record.object_kind(),
        "service resolved"
    );
    Ok(record)
}

/// Build a record from a resolve result, parsing its TXT strings.
pub fn record_from_resolved(resolved: ResolvedService) -> ServiceRecord {
    let txt = parse_txt(&resolved.txt);
    ServiceRecord {
        name: resolved.name,
        service_type: resolved.service_type,
        domain: resolved.domain,
        hostname: resolved.hostname,
        address: resolved.address,
        port: resolved.port,
        protocol: resolved.protocol,
        txt,
        resolved_at: Utc::now(),
    }
}
