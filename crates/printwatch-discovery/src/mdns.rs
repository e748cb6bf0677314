// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Multicast DNS-SD directory backed by the `mdns-sd` crate.
//
// `mdns-sd` resolves services itself and reports them as `ServiceResolved`.
// We surface a resolved service as `ItemNew` and keep its `ServiceInfo` so
// that the following `resolve` call can answer from the cache.  The daemon
// has no "all for now" notion, so one is emitted after a quiet period with
// no browse events.

use std::collections::HashMap;
use std::future::Future;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info};

use printwatch_core::error::{PrintwatchError, Result};
use printwatch_core::types::{Announcement, ProtocolFamily, ResolvedService, ServiceType};

use crate::directory::{DirectorySignal, ServiceDirectory, Subscription, SubscriptionId};

/// Domain reported for every multicast announcement.
const LOCAL_DOMAIN: &str = "local";

/// Interface index used when the daemon does not report one.
const IF_UNSPEC: i32 = -1;

type ResolvedCache = Arc<Mutex<HashMap<(ServiceType, String), ServiceInfo>>>;

struct Subscriber {
    id: SubscriptionId,
    tx: mpsc::UnboundedSender<DirectorySignal>,
}

/// Service directory using an in-process mDNS daemon.
pub struct MdnsDirectory {
    /// The underlying mDNS daemon handle.
    daemon: ServiceDaemon,
    /// Quiet period before `AllForNow` is reported.
    all_for_now: Duration,
    subscribers: Arc<Mutex<HashMap<ServiceType, Subscriber>>>,
    resolved: ResolvedCache,
    next_subscription: AtomicU64,
}

impl MdnsDirectory {
    /// Start the mDNS daemon thread.  No browsing happens until a browser is
    /// created.
    pub fn new(all_for_now: Duration) -> Result<Self> {
        let daemon = ServiceDaemon::new()
            .map_err(|e| PrintwatchError::Directory(format!("failed to start mDNS daemon: {e}")))?;
        Ok(Self {
            daemon,
            all_for_now,
            subscribers: Arc::new(Mutex::new(HashMap::new())),
            resolved: Arc::new(Mutex::new(HashMap::new())),
            next_subscription: AtomicU64::new(1),
        })
    }

    /// Shut the daemon down.  Browsers still running see their streams end.
    pub fn shutdown(&self) -> Result<()> {
        let _status_rx = self
            .daemon
            .shutdown()
            .map_err(|e| PrintwatchError::Directory(format!("daemon shutdown: {e}")))?;
        info!("mDNS daemon shut down");
        Ok(())
    }
}

#[async_trait]
impl ServiceDirectory for MdnsDirectory {
    async fn subscribe(&self, service_type: ServiceType) -> Result<Subscription> {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        let (tx, signals) = mpsc::unbounded_channel();
        let previous = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(service_type, Subscriber { id, tx });
        if previous.is_some() {
            debug!(service_type = %service_type, "replacing existing signal subscription");
        }
        Ok(Subscription { id, signals })
    }

    async fn create_browser(&self, service_type: ServiceType) -> Result<String> {
        let tx = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&service_type)
            .map(|s| s.tx.clone())
            .ok_or_else(|| PrintwatchError::BrowserCreation {
                service_type: service_type.to_string(),
                reason: "no signal subscription registered".into(),
            })?;

        let receiver = self
            .daemon
            .browse(service_type.mdns_type())
            .map_err(|e| PrintwatchError::BrowserCreation {
                service_type: service_type.to_string(),
                reason: e.to_string(),
            })?;

        tokio::spawn(pump_events(
            service_type,
            receiver,
            tx,
            Arc::clone(&self.resolved),
            self.all_for_now,
        ));

        info!(service_type = %service_type, "mDNS browser created");
        Ok(object_path(service_type))
    }

    async fn resolve(&self, announcement: &Announcement) -> Result<ResolvedService> {
        let cache = self.resolved.lock().unwrap_or_else(PoisonError::into_inner);
        let info = cache
            .get(&(announcement.service_type, announcement.name.clone()))
            .ok_or_else(|| {
                PrintwatchError::Resolve(format!(
                    "{} ({}) is no longer announced",
                    announcement.name, announcement.service_type
                ))
            })?;
        resolved_from_info(announcement, info)
    }

    async fn free_browser(&self, path: &str) -> Result<()> {
        let service_type = ServiceType::ALL
            .into_iter()
            .find(|t| object_path(*t) == path)
            .ok_or_else(|| PrintwatchError::Directory(format!("unknown browser {path}")))?;

        self.daemon
            .stop_browse(service_type.mdns_type())
            .map_err(|e| PrintwatchError::Directory(format!("stop browse {service_type}: {e}")))?;

        self.resolved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(t, _), _| *t != service_type);

        debug!(service_type = %service_type, "mDNS browser freed");
        Ok(())
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|_, s| s.id != id);
    }
}

/// Source of daemon browse events for one service type.
trait BrowseEvents {
    /// Next event, or `None` once the source is closed.
    fn next_event(&mut self) -> impl Future<Output = Option<ServiceEvent>> + Send;
}

impl BrowseEvents for mdns_sd::Receiver<ServiceEvent> {
    async fn next_event(&mut self) -> Option<ServiceEvent> {
        match self.recv_async().await {
            Ok(event) => Some(event),
            Err(e) => {
                debug!(error = %e, "mDNS receiver closed");
                None
            }
        }
    }
}

/// Browser object path for a service type.
fn object_path(service_type: ServiceType) -> String {
    format!("mdns:{}", service_type.mdns_type())
}

/// Drain the daemon's receiver for one service type and forward signals.
///
/// Ends when browsing stops, the daemon shuts down, or the subscriber goes
/// away.
async fn pump_events(
    service_type: ServiceType,
    mut receiver: impl BrowseEvents,
    tx: mpsc::UnboundedSender<DirectorySignal>,
    resolved: ResolvedCache,
    all_for_now: Duration,
) {
    let quiet = tokio::time::sleep(all_for_now);
    tokio::pin!(quiet);
    let mut reported = false;

    loop {
        let signal = tokio::select! {
            _ = &mut quiet, if !reported => {
                reported = true;
                DirectorySignal::AllForNow
            }
            event = receiver.next_event() => {
                let Some(event) = event else {
                    debug!(service_type = %service_type, "browse event source closed");
                    break;
                };
                if !reported {
                    quiet.as_mut().reset(Instant::now() + all_for_now);
                }
                match event {
                    ServiceEvent::ServiceResolved(info) => {
                        let announcement = announcement_for(service_type, info.get_fullname(), &info);
                        resolved
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .insert((service_type, announcement.name.clone()), info);
                        DirectorySignal::ItemNew(announcement)
                    }
                    ServiceEvent::ServiceRemoved(_, fullname) => {
                        let name = instance_name(service_type, &fullname);
                        resolved
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .remove(&(service_type, name.clone()));
                        DirectorySignal::ItemRemove(Announcement {
                            interface_index: IF_UNSPEC,
                            protocol: ProtocolFamily::Unspecified,
                            name,
                            service_type,
                            domain: LOCAL_DOMAIN.into(),
                            flags: 0,
                        })
                    }
                    ServiceEvent::SearchStopped(stype) => {
                        debug!(service_type = %stype, "mDNS search stopped");
                        break;
                    }
                    ServiceEvent::ServiceFound(_, fullname) => {
                        debug!(service_type = %service_type, name = %fullname, "service found");
                        continue;
                    }
                    _ => continue,
                }
            }
        };

        if tx.send(signal).is_err() {
            debug!(service_type = %service_type, "subscriber gone, stopping mDNS pump");
            break;
        }
    }
}

/// Strip the `._type._tcp.local.` suffix from a full service name.
fn instance_name(service_type: ServiceType, fullname: &str) -> String {
    fullname
        .strip_suffix(service_type.mdns_type())
        .map(|n| n.trim_end_matches('.'))
        .unwrap_or(fullname)
        .to_owned()
}

fn announcement_for(service_type: ServiceType, fullname: &str, info: &ServiceInfo) -> Announcement {
    Announcement {
        interface_index: IF_UNSPEC,
        protocol: preferred_address(info)
            .map(|a| ProtocolFamily::from(&a))
            .unwrap_or(ProtocolFamily::Unspecified),
        name: instance_name(service_type, fullname),
        service_type,
        domain: LOCAL_DOMAIN.into(),
        flags: 0,
    }
}

/// Pick the first address, preferring IPv4 for wider printer compatibility.
fn preferred_address(info: &ServiceInfo) -> Option<IpAddr> {
    let addresses = info.get_addresses();
    addresses
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| addresses.iter().next())
        .copied()
}

fn resolved_from_info(announcement: &Announcement, info: &ServiceInfo) -> Result<ResolvedService> {
    let address = preferred_address(info).ok_or_else(|| {
        PrintwatchError::Resolve(format!("no address for service {}", info.get_fullname()))
    })?;

    // Rebuild raw `key=value` strings so the TXT parser sees what was on the
    // wire.  Boolean keys (no value) come back without '='.
    let txt = info
        .get_properties()
        .iter()
        .map(|prop| {
            let mut raw = prop.key().as_bytes().to_vec();
            if let Some(val) = prop.val() {
                raw.push(b'=');
                raw.extend_from_slice(val);
            }
            raw
        })
        .collect();

    Ok(ResolvedService {
        interface_index: announcement.interface_index,
        protocol: announcement.protocol,
        name: announcement.name.clone(),
        service_type: announcement.service_type,
        domain: announcement.domain.clone(),
        hostname: info.get_hostname().to_owned(),
        address_family: ProtocolFamily::from(&address),
        address,
        port: info.get_port(),
        txt,
        flags: announcement.flags,
    })
}
