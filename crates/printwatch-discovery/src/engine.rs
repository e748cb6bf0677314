// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Discovery engine: the browser set plus the merge step.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use printwatch_core::config::DiscoveryConfig;
use printwatch_core::types::{BrowserEvent, BrowserStatus, PrinterDestination, ServiceType};

use crate::browser::{Browser, BrowserContext, BrowserSnapshot};
use crate::directory::ServiceDirectory;
use crate::fetcher::AttributeFetcher;
use crate::ipp_client::AttributeClient;
use crate::merge::merge_destinations;

/// Capacity of the browser event channel.  Slow subscribers lag rather than
/// block the browsers.
const EVENT_CAPACITY: usize = 256;

/// Owns one browser per configured service type and publishes merged
/// destination lists.
pub struct DiscoveryEngine {
    config: DiscoveryConfig,
    context: BrowserContext,
    /// In configured order, which is the merge order.
    browsers: Vec<Browser>,
    merged: watch::Sender<Vec<PrinterDestination>>,
}

impl DiscoveryEngine {
    pub fn new(
        config: DiscoveryConfig,
        directory: Arc<dyn ServiceDirectory>,
        client: Arc<dyn AttributeClient>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (merged, _) = watch::channel(Vec::new());
        let context = BrowserContext {
            directory,
            fetcher: AttributeFetcher::new(client, config.include_system_objects),
            events,
            resolve_timeout: config.resolve_timeout(),
        };
        let browsers = config.service_types.iter().copied().map(Browser::new).collect();
        Self {
            config,
            context,
            browsers,
            merged,
        }
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    /// Start every browser that is not already running.
    pub fn start(&mut self) {
        let mut started = 0;
        for browser in &mut self.browsers {
            if !browser.is_started() {
                browser.start(self.context.clone());
                started += 1;
            }
        }
        if started > 0 {
            info!(started, "discovery started");
        }
    }

    /// Stop every browser.  All browsers are cancelled before any of them
    /// tears down.  Safe to call repeatedly.
    pub async fn stop(&mut self) {
        for browser in &self.browsers {
            browser.cancel();
        }
        let mut stopped = 0;
        for browser in &mut self.browsers {
            if let Some(task) = browser.take_task() {
                if let Err(e) = task.await {
                    warn!(service_type = %browser.service_type(), error = %e, "browser task ended abnormally");
                }
                stopped += 1;
            }
        }
        if stopped > 0 {
            info!(stopped, "discovery stopped");
        }
    }

    /// Stop and start the browser for one service type.  Returns `false`
    /// if the type is not tracked.
    pub async fn restart_browser(&mut self, service_type: ServiceType) -> bool {
        let context = self.context.clone();
        let Some(browser) = self
            .browsers
            .iter_mut()
            .find(|b| b.service_type() == service_type)
        else {
            return false;
        };
        browser.stop().await;
        browser.start(context);
        true
    }

    /// Subscribe to add/remove announcements from every browser.
    pub fn events(&self) -> broadcast::Receiver<BrowserEvent> {
        self.context.events.subscribe()
    }

    /// Receiver carrying every merged list published by [`refresh`].
    ///
    /// [`refresh`]: DiscoveryEngine::refresh
    pub fn destinations(&self) -> watch::Receiver<Vec<PrinterDestination>> {
        self.merged.subscribe()
    }

    pub fn status(&self) -> Vec<BrowserStatus> {
        self.browsers.iter().map(Browser::status).collect()
    }

    /// Current discovered destinations, browsers in merge order.
    pub fn discovered(&self) -> Vec<PrinterDestination> {
        self.browsers
            .iter()
            .flat_map(|b| b.snapshot().destinations)
            .collect()
    }

    /// Merge the current discoveries with `local` and publish the result.
    pub fn refresh(&self, local: &[PrinterDestination]) -> Vec<PrinterDestination> {
        let snapshots: Vec<BrowserSnapshot> = self.browsers.iter().map(Browser::snapshot).collect();
        let merged = merge_destinations(local, snapshots.iter().flat_map(|s| s.destinations.iter()));
        debug!(count = merged.len(), "publishing merged destinations");
        self.merged.send_replace(merged.clone());
        merged
    }

    /// Wait until every browser has settled or `timeout` elapses.  Returns
    /// whether all of them settled.
    pub async fn wait_all_for_now(&self, timeout: Duration) -> bool {
        let mut receivers: Vec<_> = self.browsers.iter().map(Browser::watch).collect();
        let settled = async move {
            for rx in &mut receivers {
                if rx.wait_for(BrowserSnapshot::is_settled).await.is_err() {
                    return;
                }
            }
        };
        let done = tokio::time::timeout(timeout, settled).await.is_ok();
        if !done {
            let pending: Vec<String> = self
                .browsers
                .iter()
                .filter(|b| !b.snapshot().is_settled())
                .map(|b| b.service_type().to_string())
                .collect();
            warn!(?pending, "discovery did not settle before timeout");
        }
        done
    }

    /// Run one discovery cycle: start, wait for the browsers to settle (at
    /// most `timeout`), then merge with `local` and publish.
    pub async fn discover(
        &mut self,
        local: &[PrinterDestination],
        timeout: Duration,
    ) -> Vec<PrinterDestination> {
        self.start();
        self.wait_all_for_now(timeout).await;
        self.refresh(local)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    use crate::mock::{device_uri, printer_attributes, resolved_service, MockClient, MockDirectory};
    use printwatch_core::types::{
        BrowserEventKind, BrowserState, OPT_DEVICE_URI, OPT_LOCATION, OPT_SANITIZE_NAME, OPT_UUID,
    };

    const SETTLE: Duration = Duration::from_secs(5);

    struct Harness {
        directory: Arc<MockDirectory>,
        engine: DiscoveryEngine,
    }

    impl Harness {
        fn new(directory: MockDirectory, client: MockClient, config: DiscoveryConfig) -> Self {
            let directory = Arc::new(directory);
            let engine = DiscoveryEngine::new(config, directory.clone(), Arc::new(client));
            Self { directory, engine }
        }

        async fn started(mut self) -> Self {
            self.engine.start();
            let types = self.engine.config().service_types.clone();
            let directory = Arc::clone(&self.directory);
            eventually(|| {
                let status = self.engine.status();
                types.iter().all(|t| {
                    directory.has_browser(*t)
                        || status
                            .iter()
                            .any(|s| s.service_type == *t && s.state == BrowserState::Inactive)
                })
            })
            .await;
            self
        }

        fn all_for_now(&self) {
            for ty in &self.engine.config().service_types {
                self.directory.all_for_now(*ty);
            }
        }

        async fn settle(&self) {
            self.all_for_now();
            assert!(self.engine.wait_all_for_now(SETTLE).await);
        }
    }

    async fn eventually(mut check: impl FnMut() -> bool) {
        for _ in 0..500 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    fn reachable_printer(
        directory: &MockDirectory,
        client: &MockClient,
        ty: ServiceType,
        name: &str,
        txt: &[&str],
    ) {
        directory.add_service(resolved_service(ty, name, txt));
        client.set_attributes(
            &device_uri(ty, name),
            printer_attributes(&[("printer-state", "idle")]),
        );
    }

    fn names(dests: &[PrinterDestination]) -> Vec<&str> {
        dests.iter().map(|d| d.name.as_str()).collect()
    }

    #[tokio::test]
    async fn local_default_survives_merge_with_discovered_printer() {
        let directory = MockDirectory::new();
        let client = MockClient::new();
        reachable_printer(&directory, &client, ServiceType::Ipps, "OfficeJet", &["UUID=1234", "note=Room3"]);
        let mut h = Harness::new(directory, client, DiscoveryConfig::default()).started().await;

        h.directory.announce(ServiceType::Ipps, "OfficeJet");
        h.settle().await;

        let mut local = PrinterDestination::new("OfficeJet");
        local.is_default = true;
        let merged = h.engine.refresh(&[local]);

        assert_eq!(merged.len(), 1);
        let office = &merged[0];
        assert!(office.is_default);
        assert_eq!(office.option(OPT_UUID), Some("1234"));
        assert_eq!(office.option(OPT_LOCATION), Some("Room3"));
        assert_eq!(office.option(OPT_SANITIZE_NAME), Some("TRUE"));
        h.engine.stop().await;
    }

    #[tokio::test]
    async fn same_printer_on_two_types_appears_once() {
        let directory = MockDirectory::new();
        let client = MockClient::new();
        reachable_printer(&directory, &client, ServiceType::Ipps, "Printer-A", &[]);
        reachable_printer(&directory, &client, ServiceType::Ipp, "Printer-A", &[]);
        let mut h = Harness::new(directory, client, DiscoveryConfig::default()).started().await;

        // Plain type first; merge order still prefers the encrypted browser.
        h.directory.announce(ServiceType::Ipp, "Printer-A");
        h.directory.announce(ServiceType::Ipps, "Printer-A");
        h.settle().await;

        let merged = h.engine.refresh(&[]);
        assert_eq!(names(&merged), vec!["Printer-A"]);
        assert_eq!(
            merged[0].option(OPT_DEVICE_URI),
            Some(device_uri(ServiceType::Ipps, "Printer-A").as_str())
        );
        h.engine.stop().await;
    }

    #[tokio::test]
    async fn system_members_with_one_failure() {
        let directory = MockDirectory::new();
        let client = MockClient::new();
        directory.add_service(resolved_service(ServiceType::IppsSystem, "Hub", &["UUID=hub-1"]));
        let system_uri = device_uri(ServiceType::IppsSystem, "Hub");
        client.set_attributes(&system_uri, printer_attributes(&[("system-state", "idle")]));
        client.set_printers(
            &system_uri,
            &[
                ("Hub-1", "ipps://hub.local:631/ipp/print/1"),
                ("Hub-2", "ipps://hub.local:631/ipp/print/2"),
                ("Hub-3", "ipps://hub.local:631/ipp/print/3"),
            ],
        );
        client.set_attributes("ipps://hub.local:631/ipp/print/1", printer_attributes(&[]));
        client.set_attributes("ipps://hub.local:631/ipp/print/3", printer_attributes(&[]));
        let mut h = Harness::new(directory, client, DiscoveryConfig::default()).started().await;

        h.directory.announce(ServiceType::IppsSystem, "Hub");
        h.settle().await;

        let merged = h.engine.refresh(&[]);
        assert_eq!(names(&merged), vec!["Hub-1", "Hub-3"]);
        assert!(merged.iter().all(|d| d.option(OPT_UUID) == Some("hub-1")));
        h.engine.stop().await;
    }

    #[tokio::test]
    async fn removed_printer_leaves_local_entry() {
        let directory = MockDirectory::new();
        let client = MockClient::new();
        reachable_printer(&directory, &client, ServiceType::Ipp, "Annex", &[]);
        reachable_printer(&directory, &client, ServiceType::Ipp, "Lobby", &[]);
        let mut h = Harness::new(directory, client, DiscoveryConfig::default()).started().await;

        h.directory.announce(ServiceType::Ipp, "Annex");
        h.directory.announce(ServiceType::Ipp, "Lobby");
        h.settle().await;

        let local = [PrinterDestination::new("Lobby")];
        assert_eq!(names(&h.engine.refresh(&local)), vec!["Annex", "Lobby"]);

        h.directory.remove(ServiceType::Ipp, "Annex");
        h.directory.remove(ServiceType::Ipp, "Lobby");
        eventually(|| h.engine.discovered().is_empty()).await;

        let merged = h.engine.refresh(&local);
        assert_eq!(names(&merged), vec!["Lobby"]);
        assert!(merged[0].option(OPT_SANITIZE_NAME).is_none());
        h.engine.stop().await;
    }

    #[tokio::test]
    async fn identical_announcements_merge_identically() {
        let directory = MockDirectory::new();
        let client = MockClient::new();
        reachable_printer(&directory, &client, ServiceType::Ipp, "Lobby", &["note=Hall"]);
        reachable_printer(&directory, &client, ServiceType::Ipps, "Office", &[]);
        let mut h = Harness::new(directory, client, DiscoveryConfig::default()).started().await;

        h.directory.announce(ServiceType::Ipp, "Lobby");
        h.directory.announce(ServiceType::Ipps, "Office");
        h.settle().await;
        let local = [PrinterDestination::new("Office"), PrinterDestination::new("Desk")];
        let first = h.engine.refresh(&local);
        let second = h.engine.refresh(&local);

        assert_eq!(first, second);
        let published = h.engine.destinations().borrow().clone();
        assert_eq!(published, second);
        let unique: HashSet<_> = first.iter().map(|d| d.name.clone()).collect();
        assert_eq!(unique.len(), first.len());
        h.engine.stop().await;
    }

    #[tokio::test]
    async fn out_of_order_resolves_are_all_tracked() {
        let directory = MockDirectory::new();
        let client = MockClient::new();
        reachable_printer(&directory, &client, ServiceType::Ipp, "First", &[]);
        reachable_printer(&directory, &client, ServiceType::Ipp, "Second", &[]);
        directory.set_resolve_delay("First", Duration::from_millis(40));
        let mut h = Harness::new(directory, client, DiscoveryConfig::default()).started().await;

        h.directory.announce(ServiceType::Ipp, "First");
        h.directory.announce(ServiceType::Ipp, "Second");
        h.settle().await;

        let merged = h.engine.refresh(&[]);
        assert_eq!(names(&merged), vec!["Second", "First"]);
        h.engine.stop().await;
    }

    #[tokio::test]
    async fn failing_browser_does_not_block_others() {
        let directory = MockDirectory::new();
        let client = MockClient::new();
        directory.fail_type(ServiceType::Ipps);
        reachable_printer(&directory, &client, ServiceType::Ipp, "Lobby", &[]);
        let mut h = Harness::new(directory, client, DiscoveryConfig::default()).started().await;

        h.directory.announce(ServiceType::Ipp, "Lobby");
        h.settle().await;

        let status = h.engine.status();
        let state_of = |ty: ServiceType| status.iter().find(|s| s.service_type == ty).map(|s| s.state);
        assert_eq!(state_of(ServiceType::Ipps), Some(BrowserState::Inactive));
        assert_eq!(state_of(ServiceType::Ipp), Some(BrowserState::AllForNow));
        assert_eq!(names(&h.engine.refresh(&[])), vec!["Lobby"]);
        h.engine.stop().await;
    }

    #[tokio::test]
    async fn every_browser_subscribes_before_creating() {
        let h = Harness::new(MockDirectory::new(), MockClient::new(), DiscoveryConfig::default())
            .started()
            .await;
        let calls = h.directory.calls();
        for ty in ServiceType::ALL {
            let subscribe = calls.iter().position(|c| *c == format!("subscribe {ty}"));
            let create = calls.iter().position(|c| *c == format!("create_browser {ty}"));
            assert!(subscribe.is_some() && subscribe < create, "{ty}: {calls:?}");
        }
        let mut engine = h.engine;
        engine.stop().await;
    }

    #[tokio::test]
    async fn start_is_idempotent_and_stop_is_repeatable() {
        let mut h = Harness::new(MockDirectory::new(), MockClient::new(), DiscoveryConfig::default())
            .started()
            .await;
        h.engine.start();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let subscribes = h.directory.calls().iter().filter(|c| c.starts_with("subscribe")).count();
        assert_eq!(subscribes, ServiceType::ALL.len());

        h.engine.stop().await;
        h.engine.stop().await;
        assert_eq!(h.directory.subscriber_count(), 0);
        assert!(h.engine.status().iter().all(|s| s.state == BrowserState::Inactive));
        let frees = h.directory.calls().iter().filter(|c| c.starts_with("free_browser")).count();
        assert_eq!(frees, ServiceType::ALL.len());
    }

    #[tokio::test]
    async fn events_are_broadcast() {
        let mut h = Harness::new(MockDirectory::new(), MockClient::new(), DiscoveryConfig::default())
            .started()
            .await;
        let mut events = h.engine.events();

        h.directory.announce(ServiceType::IppSystem, "Hub");
        h.directory.remove(ServiceType::IppSystem, "Ghost");

        let added = tokio::time::timeout(SETTLE, events.recv()).await.unwrap().unwrap();
        assert_eq!(added.kind, BrowserEventKind::Added);
        assert_eq!(added.browser, ServiceType::IppSystem);
        assert_eq!(added.name, "Hub");
        assert_eq!(added.announced_type, "_ipp-system._tcp");

        let removed = tokio::time::timeout(SETTLE, events.recv()).await.unwrap().unwrap();
        assert_eq!(removed.kind, BrowserEventKind::Removed);
        assert_eq!(removed.name, "Ghost");
        h.engine.stop().await;
    }

    #[tokio::test]
    async fn restart_rebuilds_one_browser() {
        let mut h = Harness::new(MockDirectory::new(), MockClient::new(), DiscoveryConfig::default())
            .started()
            .await;
        assert!(h.engine.restart_browser(ServiceType::Ipp).await);
        eventually(|| h.directory.has_browser(ServiceType::Ipp)).await;

        let creates = h
            .directory
            .calls()
            .iter()
            .filter(|c| *c == "create_browser _ipp._tcp")
            .count();
        assert_eq!(creates, 2);
        h.engine.stop().await;
    }

    #[tokio::test]
    async fn discover_runs_a_full_cycle() {
        let directory = MockDirectory::new();
        let client = MockClient::new();
        reachable_printer(&directory, &client, ServiceType::Ipp, "Lobby", &[]);
        let directory = Arc::new(directory);
        let config = DiscoveryConfig {
            service_types: vec![ServiceType::Ipp],
            ..DiscoveryConfig::default()
        };
        let mut engine = DiscoveryEngine::new(config, directory.clone(), Arc::new(client));

        let feeder = {
            let directory = Arc::clone(&directory);
            tokio::spawn(async move {
                eventually(|| directory.has_browser(ServiceType::Ipp)).await;
                directory.announce(ServiceType::Ipp, "Lobby");
                directory.all_for_now(ServiceType::Ipp);
            })
        };

        let merged = engine.discover(&[PrinterDestination::new("Desk")], SETTLE).await;
        feeder.await.unwrap();
        assert_eq!(names(&merged), vec!["Lobby", "Desk"]);
        engine.stop().await;
    }
}
