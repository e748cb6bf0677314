// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scripted in-memory directory and IPP client for tests.

use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;

use printwatch_core::error::{PrintwatchError, Result};
use printwatch_core::types::{
    Announcement, ObjectKind, ProtocolFamily, ResolvedService, ServiceRecord, ServiceType,
    TxtFields,
};

use crate::directory::{DirectorySignal, ServiceDirectory, Subscription, SubscriptionId};
use crate::ipp_client::{AttributeClient, AttributeMap, PrinterListing};
use crate::resolver::record_from_resolved;

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn host_for(name: &str) -> String {
    format!("{}.local.", name.to_lowercase().replace(' ', "-"))
}

/// A resolve tuple for `name` on `host_for(name)`, port 631.
pub fn resolved_service(service_type: ServiceType, name: &str, txt: &[&str]) -> ResolvedService {
    ResolvedService {
        interface_index: 2,
        protocol: ProtocolFamily::Inet,
        name: name.to_owned(),
        service_type,
        domain: "local".into(),
        hostname: host_for(name),
        address_family: ProtocolFamily::Inet,
        address: IpAddr::V4(Ipv4Addr::new(192, 168, 1, 10)),
        port: 631,
        txt: txt.iter().map(|t| t.as_bytes().to_vec()).collect(),
        flags: 0,
    }
}

/// Device URI the pipeline will derive for a service with no TXT data.
pub fn device_uri(service_type: ServiceType, name: &str) -> String {
    record_from_resolved(resolved_service(service_type, name, &[])).device_uri()
}

pub fn record_for(service_type: ServiceType, name: &str, hostname: &str, port: u16) -> ServiceRecord {
    ServiceRecord {
        name: name.to_owned(),
        service_type,
        domain: "local".into(),
        hostname: hostname.to_owned(),
        address: IpAddr::V4(Ipv4Addr::new(192, 168, 1, 10)),
        port,
        protocol: ProtocolFamily::Inet,
        txt: TxtFields::default(),
        resolved_at: Utc::now(),
    }
}

pub fn printer_attributes(pairs: &[(&str, &str)]) -> AttributeMap {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
        .collect()
}

// ---------------------------------------------------------------------------
// Directory
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MockDirectory {
    services: Mutex<HashMap<(ServiceType, String), ResolvedService>>,
    delays: Mutex<HashMap<String, Duration>>,
    failing: Mutex<HashSet<ServiceType>>,
    subscribers: Mutex<HashMap<ServiceType, (SubscriptionId, mpsc::UnboundedSender<DirectorySignal>)>>,
    browsers: Mutex<HashSet<ServiceType>>,
    calls: Mutex<Vec<String>>,
    next_id: AtomicU64,
}

impl MockDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_service(&self, service: ResolvedService) {
        lock(&self.services).insert((service.service_type, service.name.clone()), service);
    }

    pub fn set_resolve_delay(&self, name: &str, delay: Duration) {
        lock(&self.delays).insert(name.to_owned(), delay);
    }

    /// Make `create_browser` fail for `service_type`.
    pub fn fail_type(&self, service_type: ServiceType) {
        lock(&self.failing).insert(service_type);
    }

    pub fn announcement(&self, service_type: ServiceType, name: &str) -> Announcement {
        Announcement {
            interface_index: 2,
            protocol: ProtocolFamily::Inet,
            name: name.to_owned(),
            service_type,
            domain: "local".into(),
            flags: 0,
        }
    }

    fn signal(&self, service_type: ServiceType, signal: DirectorySignal) {
        if let Some((_, tx)) = lock(&self.subscribers).get(&service_type) {
            let _ = tx.send(signal);
        }
    }

    pub fn announce(&self, service_type: ServiceType, name: &str) {
        self.signal(service_type, DirectorySignal::ItemNew(self.announcement(service_type, name)));
    }

    pub fn remove(&self, service_type: ServiceType, name: &str) {
        self.signal(service_type, DirectorySignal::ItemRemove(self.announcement(service_type, name)));
    }

    pub fn all_for_now(&self, service_type: ServiceType) {
        self.signal(service_type, DirectorySignal::AllForNow);
    }

    pub fn fail(&self, service_type: ServiceType, reason: &str) {
        self.signal(service_type, DirectorySignal::Failure(reason.to_owned()));
    }

    /// Whether a browser object currently exists for `service_type`.
    pub fn has_browser(&self, service_type: ServiceType) -> bool {
        lock(&self.browsers).contains(&service_type)
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.subscribers).len()
    }

    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    fn record_call(&self, call: String) {
        lock(&self.calls).push(call);
    }
}

fn mock_path(service_type: ServiceType) -> String {
    format!("/mock/browser/{}", service_type.as_str())
}

#[async_trait]
impl ServiceDirectory for MockDirectory {
    async fn subscribe(&self, service_type: ServiceType) -> Result<Subscription> {
        self.record_call(format!("subscribe {service_type}"));
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, signals) = mpsc::unbounded_channel();
        lock(&self.subscribers).insert(service_type, (id, tx));
        Ok(Subscription { id, signals })
    }

    async fn create_browser(&self, service_type: ServiceType) -> Result<String> {
        self.record_call(format!("create_browser {service_type}"));
        if lock(&self.failing).contains(&service_type) {
            return Err(PrintwatchError::BrowserCreation {
                service_type: service_type.to_string(),
                reason: "directory disabled".into(),
            });
        }
        lock(&self.browsers).insert(service_type);
        Ok(mock_path(service_type))
    }

    async fn resolve(&self, announcement: &Announcement) -> Result<ResolvedService> {
        let delay = lock(&self.delays).get(&announcement.name).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        lock(&self.services)
            .get(&(announcement.service_type, announcement.name.clone()))
            .cloned()
            .ok_or_else(|| PrintwatchError::Resolve(format!("{} not found", announcement.name)))
    }

    async fn free_browser(&self, object_path: &str) -> Result<()> {
        self.record_call(format!("free_browser {object_path}"));
        lock(&self.browsers).retain(|t| mock_path(*t) != object_path);
        Ok(())
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.record_call("unsubscribe".into());
        lock(&self.subscribers).retain(|_, (sid, _)| *sid != id);
    }
}

// ---------------------------------------------------------------------------
// IPP client
// ---------------------------------------------------------------------------

/// Answers from canned responses; any other URI behaves as unreachable.
/// A URI given a rejection status answers every attribute query with it.
#[derive(Default)]
pub struct MockClient {
    attributes: Mutex<HashMap<String, AttributeMap>>,
    listings: Mutex<HashMap<String, PrinterListing>>,
    rejections: Mutex<HashMap<String, String>>,
}

impl MockClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_attributes(&self, uri: &str, attrs: AttributeMap) {
        lock(&self.attributes).insert(uri.to_owned(), attrs);
    }

    pub fn set_printers(&self, system_uri: &str, members: &[(&str, &str)]) {
        self.set_listing(
            system_uri,
            members.iter().map(|(n, _)| (*n).to_owned()).collect(),
            members.iter().map(|(_, u)| (*u).to_owned()).collect(),
        );
    }

    pub fn set_listing(&self, system_uri: &str, names: Vec<String>, uris: Vec<String>) {
        lock(&self.listings).insert(system_uri.to_owned(), PrinterListing { names, uris });
    }

    /// Make `uri` reachable but answer with a non-success IPP `status`.
    pub fn set_rejection(&self, uri: &str, status: &str) {
        lock(&self.rejections).insert(uri.to_owned(), status.to_owned());
    }
}

#[async_trait]
impl AttributeClient for MockClient {
    async fn get_attributes(&self, uri: &str, kind: ObjectKind) -> Result<AttributeMap> {
        if let Some(status) = lock(&self.rejections).get(uri) {
            let operation = match kind {
                ObjectKind::System => "Get-System-Attributes",
                ObjectKind::Printer => "Get-Printer-Attributes",
            };
            return Err(PrintwatchError::IppStatus {
                operation: operation.into(),
                status: status.clone(),
            });
        }
        lock(&self.attributes)
            .get(uri)
            .cloned()
            .ok_or_else(|| PrintwatchError::IppRequest(format!("{uri}: connection refused")))
    }

    async fn get_printers(&self, system_uri: &str) -> Result<PrinterListing> {
        lock(&self.listings)
            .get(system_uri)
            .cloned()
            .ok_or_else(|| PrintwatchError::IppRequest(format!("{system_uri}: connection refused")))
    }
}
