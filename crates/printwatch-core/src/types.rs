// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Printwatch discovery engine.

use std::fmt;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Option key holding the URI used to reach the destination.
pub const OPT_DEVICE_URI: &str = "device-uri";
/// Option key holding the endpoint UUID from the TXT record.
pub const OPT_UUID: &str = "UUID";
/// Option key holding the admin / more-info URL.
pub const OPT_MORE_INFO: &str = "printer-more-info";
/// Option key holding the human-readable location.
pub const OPT_LOCATION: &str = "printer-location";
/// Option key holding the announced host name.
pub const OPT_HOSTNAME: &str = "hostname";
/// Option key recording whether the entry came from a system or printer object.
pub const OPT_OBJ_TYPE: &str = "OBJ_TYPE";
/// Option key set on discovered entries that were merged with a local entry.
pub const OPT_SANITIZE_NAME: &str = "sanitize-name";
/// Value recorded for a queried attribute the endpoint did not return.
pub const UNKNOWN_VALUE: &str = "unknown";

// ---------------------------------------------------------------------------
// Service types
// ---------------------------------------------------------------------------

/// DNS-SD service types tracked by the engine.
///
/// Each variant owns one browser.  Adding a variant (and listing it in
/// [`ServiceType::ALL`]) is all that is needed to track another type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ServiceType {
    /// IPP System Service over TLS.
    #[serde(rename = "_ipps-system._tcp")]
    IppsSystem,
    /// IPP System Service over plain HTTP.
    #[serde(rename = "_ipp-system._tcp")]
    IppSystem,
    /// IPP printer over TLS.
    #[serde(rename = "_ipps._tcp")]
    Ipps,
    /// IPP printer over plain HTTP.
    #[serde(rename = "_ipp._tcp")]
    Ipp,
}

impl ServiceType {
    /// Registry order.  Merging walks browsers in this order.
    pub const ALL: [ServiceType; 4] = [
        ServiceType::IppsSystem,
        ServiceType::IppSystem,
        ServiceType::Ipps,
        ServiceType::Ipp,
    ];

    /// DNS-SD type string without domain (e.g. `_ipps._tcp`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IppsSystem => "_ipps-system._tcp",
            Self::IppSystem => "_ipp-system._tcp",
            Self::Ipps => "_ipps._tcp",
            Self::Ipp => "_ipp._tcp",
        }
    }

    /// Fully-qualified multicast type (e.g. `_ipps._tcp.local.`).
    pub fn mdns_type(&self) -> &'static str {
        match self {
            Self::IppsSystem => "_ipps-system._tcp.local.",
            Self::IppSystem => "_ipp-system._tcp.local.",
            Self::Ipps => "_ipps._tcp.local.",
            Self::Ipp => "_ipp._tcp.local.",
        }
    }

    /// Parse a DNS-SD type string, with or without a trailing `.local.`.
    pub fn from_dns_sd(value: &str) -> Option<Self> {
        let trimmed = value.trim_end_matches('.');
        let trimmed = trimmed.strip_suffix(".local").unwrap_or(trimmed);
        Self::ALL.into_iter().find(|t| t.as_str() == trimmed)
    }

    /// Whether the announced endpoint is reached over TLS.
    pub fn is_encrypted(&self) -> bool {
        matches!(self, Self::IppsSystem | Self::Ipps)
    }

    /// IPP URI scheme for endpoints of this type.
    pub fn uri_scheme(&self) -> &'static str {
        if self.is_encrypted() { "ipps" } else { "ipp" }
    }

    /// Kind of IPP object announced under this type.
    pub fn object_kind(&self) -> ObjectKind {
        match self {
            Self::IppsSystem | Self::IppSystem => ObjectKind::System,
            Self::Ipps | Self::Ipp => ObjectKind::Printer,
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of IPP object behind a discovered endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    /// An IPP System that may host several member printers.
    System,
    /// A single printer.
    Printer,
}

impl ObjectKind {
    /// Value stored under the `OBJ_TYPE` option.
    pub fn label(&self) -> &'static str {
        match self {
            Self::System => "SYSTEM_OBJECT",
            Self::Printer => "PRINTER_OBJECT",
        }
    }

    /// Resource path used when the TXT record carries no `rp` key.
    pub fn default_resource(&self) -> &'static str {
        match self {
            Self::System => "ipp/system",
            Self::Printer => "ipp/print",
        }
    }

    /// Operation attribute naming the target object in a request.
    pub fn target_attribute(&self) -> &'static str {
        match self {
            Self::System => "system-uri",
            Self::Printer => "printer-uri",
        }
    }
}

/// Address family reported by the directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolFamily {
    Inet,
    Inet6,
    Unspecified,
}

impl From<&IpAddr> for ProtocolFamily {
    fn from(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => Self::Inet,
            IpAddr::V6(_) => Self::Inet6,
        }
    }
}

// ---------------------------------------------------------------------------
// Directory tuples
// ---------------------------------------------------------------------------

/// Identity of an announced service.  At most one live record per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordKey {
    pub name: String,
    pub service_type: ServiceType,
    pub domain: String,
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.name, self.service_type, self.domain)
    }
}

/// An `ItemNew` / `ItemRemove` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    pub interface_index: i32,
    pub protocol: ProtocolFamily,
    pub name: String,
    pub service_type: ServiceType,
    pub domain: String,
    pub flags: u32,
}

impl Announcement {
    pub fn key(&self) -> RecordKey {
        RecordKey {
            name: self.name.clone(),
            service_type: self.service_type,
            domain: self.domain.clone(),
        }
    }
}

/// Raw result of a resolve call, before TXT parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedService {
    pub interface_index: i32,
    pub protocol: ProtocolFamily,
    pub name: String,
    pub service_type: ServiceType,
    pub domain: String,
    pub hostname: String,
    pub address_family: ProtocolFamily,
    pub address: IpAddr,
    pub port: u16,
    /// Raw TXT strings, each nominally `key=value`.
    pub txt: Vec<Vec<u8>>,
    pub flags: u32,
}

// ---------------------------------------------------------------------------
// Service records
// ---------------------------------------------------------------------------

/// Printer metadata carried in a TXT record.
///
/// `printer_type` and `printer_state` are `None` when the key never appeared
/// (or carried no parsable number), which is distinct from a present zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxtFields {
    pub resource_path: Option<String>,
    pub location: Option<String>,
    pub uuid: Option<String>,
    pub admin_url: Option<String>,
    pub printer_type: Option<u64>,
    pub printer_state: Option<u64>,
}

/// One resolved network announcement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub name: String,
    pub service_type: ServiceType,
    pub domain: String,
    pub hostname: String,
    pub address: IpAddr,
    pub port: u16,
    pub protocol: ProtocolFamily,
    pub txt: TxtFields,
    pub resolved_at: DateTime<Utc>,
}

impl ServiceRecord {
    pub fn key(&self) -> RecordKey {
        RecordKey {
            name: self.name.clone(),
            service_type: self.service_type,
            domain: self.domain.clone(),
        }
    }

    pub fn object_kind(&self) -> ObjectKind {
        self.service_type.object_kind()
    }

    /// Host part used in URIs.  Falls back to the address when the directory
    /// reported no host name.
    pub fn uri_host(&self) -> String {
        if self.hostname.is_empty() {
            match self.address {
                IpAddr::V4(v4) => v4.to_string(),
                IpAddr::V6(v6) => format!("[{v6}]"),
            }
        } else {
            self.hostname.trim_end_matches('.').to_owned()
        }
    }

    /// IPP URI of the announced object, e.g. `ipps://host.local:631/ipp/print`.
    pub fn device_uri(&self) -> String {
        let resource = self
            .txt
            .resource_path
            .as_deref()
            .filter(|rp| !rp.is_empty())
            .unwrap_or_else(|| self.object_kind().default_resource());
        format!(
            "{}://{}:{}/{}",
            self.service_type.uri_scheme(),
            self.uri_host(),
            self.port,
            resource.trim_start_matches('/')
        )
    }

    /// Admin page advertised in TXT, or the endpoint's HTTP root.
    pub fn more_info_uri(&self) -> String {
        match &self.txt.admin_url {
            Some(url) => url.clone(),
            None => format!("http://{}:{}", self.uri_host(), self.port),
        }
    }
}

// ---------------------------------------------------------------------------
// Destinations
// ---------------------------------------------------------------------------

/// A single `name = value` destination option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationOption {
    pub name: String,
    pub value: String,
}

/// Insertion-ordered option map.  Keys are unique; a repeated insert
/// replaces the value in place.  Deserializing goes through the same rule,
/// so a list naming a key twice keeps the last value at the first position.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<DestinationOption>", into = "Vec<DestinationOption>")]
pub struct DestinationOptions(Vec<DestinationOption>);

impl From<Vec<DestinationOption>> for DestinationOptions {
    fn from(list: Vec<DestinationOption>) -> Self {
        let mut options = Self::new();
        for DestinationOption { name, value } in list {
            options.insert(name, value);
        }
        options
    }
}

impl From<DestinationOptions> for Vec<DestinationOption> {
    fn from(options: DestinationOptions) -> Self {
        options.0
    }
}

impl DestinationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|o| o.name == name)
            .map(|o| o.value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|o| o.name == name)
    }

    /// Set `name`, replacing any existing value (last write wins).
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.0.iter_mut().find(|o| o.name == name) {
            Some(existing) => existing.value = value,
            None => self.0.push(DestinationOption { name, value }),
        }
    }

    /// Set `name` only if it is not present yet.  Returns whether it was set.
    pub fn insert_if_absent(&mut self, name: impl Into<String>, value: impl Into<String>) -> bool {
        let name = name.into();
        if self.contains(&name) {
            return false;
        }
        self.0.push(DestinationOption {
            name,
            value: value.into(),
        });
        true
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|o| (o.name.as_str(), o.value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A usable print destination, from local configuration or from discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrinterDestination {
    pub name: String,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub instance: Option<String>,
    #[serde(default)]
    pub options: DestinationOptions,
}

impl PrinterDestination {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_default: false,
            instance: None,
            options: DestinationOptions::new(),
        }
    }

    /// Builder-style option setter.
    pub fn with_option(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(name, value);
        self
    }

    pub fn option(&self, name: &str) -> Option<&str> {
        self.options.get(name)
    }
}

// ---------------------------------------------------------------------------
// Browser events
// ---------------------------------------------------------------------------

/// Whether an announcement added or removed a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BrowserEventKind {
    Added,
    Removed,
}

/// Event published by a browser for each processed announcement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserEvent {
    pub kind: BrowserEventKind,
    /// Browser that received the announcement.
    pub browser: ServiceType,
    pub name: String,
    /// Type string as announced.
    pub announced_type: String,
    pub domain: String,
}

/// Lifecycle state of one browser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BrowserState {
    /// Not started, stopped, or subscription creation failed.
    Inactive,
    /// Subscribing and creating the browser object.
    Starting,
    /// Subscribed and receiving announcements.
    Browsing,
    /// The directory reported the initial burst complete.
    AllForNow,
}

/// Snapshot of one browser for status reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserStatus {
    pub service_type: ServiceType,
    pub state: BrowserState,
    pub object_path: Option<String>,
    pub tracked_records: usize,
    /// Resolves and queries not yet completed.
    pub in_flight: usize,
    pub destinations: usize,
}
