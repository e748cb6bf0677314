// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Discovery engine configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{PrintwatchError, Result};
use crate::types::ServiceType;

/// Settings for one discovery engine instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Service types to browse, in merge order.
    pub service_types: Vec<ServiceType>,
    /// Timeout for a single IPP request, in milliseconds.
    pub request_timeout_ms: u64,
    /// Timeout for a single resolve call, in milliseconds.
    pub resolve_timeout_ms: u64,
    /// Quiet period after which the multicast backend reports all-for-now.
    pub all_for_now_ms: u64,
    /// Accept self-signed printer certificates on `ipps://` endpoints.
    pub ignore_tls_errors: bool,
    /// Sent as `requesting-user-name`.  Defaults to `$USER`.
    pub requesting_user_name: String,
    /// Also emit the IPP System object itself as a destination.
    pub include_system_objects: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            service_types: ServiceType::ALL.to_vec(),
            request_timeout_ms: 5_000,
            resolve_timeout_ms: 5_000,
            all_for_now_ms: 3_000,
            ignore_tls_errors: true,
            requesting_user_name: default_user_name(),
            include_system_objects: false,
        }
    }
}

impl DiscoveryConfig {
    /// Load configuration from a JSON file.
    ///
    /// A missing file yields the defaults; an unreadable or malformed file is
    /// an error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&data)?;
        config.validate()?;
        info!(path = %path.display(), types = config.service_types.len(), "loaded discovery config");
        Ok(config)
    }

    /// Write configuration as pretty JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        let mut seen = Vec::with_capacity(self.service_types.len());
        for ty in &self.service_types {
            if seen.contains(ty) {
                return Err(PrintwatchError::Config(format!(
                    "service type {ty} listed twice"
                )));
            }
            seen.push(*ty);
        }
        if self.request_timeout_ms == 0 || self.resolve_timeout_ms == 0 {
            return Err(PrintwatchError::Config("timeouts must be non-zero".into()));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_millis(self.resolve_timeout_ms)
    }

    pub fn all_for_now(&self) -> Duration {
        Duration::from_millis(self.all_for_now_ms)
    }
}

fn default_user_name() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "anonymous".into())
}
