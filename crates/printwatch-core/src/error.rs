// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Printwatch.

use thiserror::Error;

/// Top-level error type for all Printwatch operations.
#[derive(Debug, Error)]
pub enum PrintwatchError {
    // -- Directory (DNS-SD) errors --
    #[error("service directory unavailable: {0}")]
    Directory(String),

    #[error("service browser creation failed for {service_type}: {reason}")]
    BrowserCreation { service_type: String, reason: String },

    #[error("service resolution failed: {0}")]
    Resolve(String),

    #[error("operation cancelled")]
    Cancelled,

    // -- Printing protocol errors --
    #[error("IPP request failed: {0}")]
    IppRequest(String),

    #[error("{operation} returned status {status}")]
    IppStatus { operation: String, status: String },

    #[error("invalid URI '{uri}': {reason}")]
    InvalidUri { uri: String, reason: String },

    #[error("system printer listing invalid: {names} names, {uris} URIs")]
    InvalidSystemListing { names: usize, uris: usize },

    // -- Configuration / persistence --
    #[error("configuration error: {0}")]
    Config(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PrintwatchError {
    /// Whether this error only reports that an operation was cancelled.
    ///
    /// Cancellation is expected during shutdown and is never logged as a
    /// failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, PrintwatchError>;
