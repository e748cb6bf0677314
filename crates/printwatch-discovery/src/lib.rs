// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Printwatch Discovery — DNS-SD browsing for IPP printers and IPP systems,
// per-endpoint attribute queries, and reconciliation of the discovered
// printers against a locally configured destination list.
//
// Pipeline: browser (one per service type) -> resolver -> attribute fetcher
// (+ system expander for IPP systems) -> merge.

pub mod browser;
pub mod directory;
pub mod engine;
pub mod expander;
pub mod fetcher;
pub mod ipp_client;
pub mod mdns;
pub mod merge;
pub mod resolver;
pub mod txt;

#[cfg(test)]
mod mock;

pub use directory::{DirectorySignal, ServiceDirectory};
pub use engine::DiscoveryEngine;
pub use fetcher::AttributeFetcher;
pub use ipp_client::{AttributeClient, IppClient};
pub use mdns::MdnsDirectory;
pub use merge::merge_destinations;
