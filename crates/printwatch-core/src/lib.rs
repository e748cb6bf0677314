// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Printwatch — Core types, configuration, and error definitions shared by the
// discovery engine and its consumers.

pub mod config;
pub mod error;
pub mod types;

pub use config::DiscoveryConfig;
pub use error::PrintwatchError;
pub use types::*;
