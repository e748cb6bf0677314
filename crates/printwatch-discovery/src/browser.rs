// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// One browser per tracked service type.
//
// Each browser is a single task that owns its tracked records.  Resolves and
// attribute queries run as separate tasks and post their results back over a
// channel; they hold only a weak sender and a child cancellation token, so a
// completion that arrives after the browser stopped goes nowhere.  The
// browser's state is published through a `watch` channel.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use printwatch_core::error::{PrintwatchError, Result};
use printwatch_core::types::{
    Announcement, BrowserEvent, BrowserEventKind, BrowserState, BrowserStatus, PrinterDestination,
    RecordKey, ServiceRecord, ServiceType,
};

use crate::directory::{DirectorySignal, ServiceDirectory, Subscription, SubscriptionId};
use crate::fetcher::AttributeFetcher;
use crate::resolver;

/// Published view of one browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserSnapshot {
    pub state: BrowserState,
    pub object_path: Option<String>,
    pub tracked_records: usize,
    /// Resolves plus attribute queries still outstanding.
    pub in_flight: usize,
    /// Destinations from every tracked record, in discovery order.
    pub destinations: Vec<PrinterDestination>,
}

impl BrowserSnapshot {
    fn inactive() -> Self {
        Self {
            state: BrowserState::Inactive,
            object_path: None,
            tracked_records: 0,
            in_flight: 0,
            destinations: Vec::new(),
        }
    }

    /// True once the browser has nothing more to report for now: its
    /// initial burst is complete and every started query has finished, or
    /// it is not running at all.
    pub fn is_settled(&self) -> bool {
        match self.state {
            BrowserState::Inactive => true,
            BrowserState::AllForNow => self.in_flight == 0,
            BrowserState::Starting | BrowserState::Browsing => false,
        }
    }
}

/// Shared dependencies handed to each browser task.
#[derive(Clone)]
pub struct BrowserContext {
    pub directory: Arc<dyn ServiceDirectory>,
    pub fetcher: AttributeFetcher,
    pub events: broadcast::Sender<BrowserEvent>,
    pub resolve_timeout: Duration,
}

/// Handle to the browser for one service type.
pub struct Browser {
    service_type: ServiceType,
    snapshot: Arc<watch::Sender<BrowserSnapshot>>,
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Browser {
    pub fn new(service_type: ServiceType) -> Self {
        let (snapshot, _) = watch::channel(BrowserSnapshot::inactive());
        Self {
            service_type,
            snapshot: Arc::new(snapshot),
            token: CancellationToken::new(),
            task: None,
        }
    }

    pub fn service_type(&self) -> ServiceType {
        self.service_type
    }

    /// Whether the browser task is still running.  A task that ended on its
    /// own (after a directory failure) counts as not started.
    pub fn is_started(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Spawn the browser task.  Does nothing while a previous task is still
    /// running.
    pub fn start(&mut self, context: BrowserContext) {
        if self.is_started() {
            debug!(service_type = %self.service_type, "browser already started");
            return;
        }
        if self.task.take().is_some() {
            debug!(service_type = %self.service_type, "previous browser task ended, restarting");
        }

        self.token = CancellationToken::new();
        self.snapshot.send_modify(|s| s.state = BrowserState::Starting);

        let worker = Worker {
            service_type: self.service_type,
            context,
            token: self.token.clone(),
            snapshot: Arc::clone(&self.snapshot),
            tracked: Vec::new(),
            pending: HashSet::new(),
            generation: 0,
        };
        self.task = Some(tokio::spawn(worker.run()));
    }

    /// Cancel the browser and its in-flight work.  Teardown continues in
    /// the browser task; await the handle from [`Browser::take_task`] to
    /// wait for it.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn take_task(&mut self) -> Option<JoinHandle<()>> {
        self.task.take()
    }

    /// Cancel and wait for teardown.  Safe to call when not started.
    pub async fn stop(&mut self) {
        self.cancel();
        if let Some(task) = self.take_task() {
            if let Err(e) = task.await {
                warn!(service_type = %self.service_type, error = %e, "browser task ended abnormally");
            }
        }
    }

    pub fn snapshot(&self) -> BrowserSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<BrowserSnapshot> {
        self.snapshot.subscribe()
    }

    pub fn status(&self) -> BrowserStatus {
        let snapshot = self.snapshot.borrow();
        BrowserStatus {
            service_type: self.service_type,
            state: snapshot.state,
            object_path: snapshot.object_path.clone(),
            tracked_records: snapshot.tracked_records,
            in_flight: snapshot.in_flight,
            destinations: snapshot.destinations.len(),
        }
    }
}

/// Results posted back to the browser task.
enum Completion {
    Resolved {
        key: RecordKey,
        result: Result<ServiceRecord>,
    },
    Fetched {
        key: RecordKey,
        generation: u64,
        destinations: Vec<PrinterDestination>,
    },
}

struct TrackedRecord {
    record: ServiceRecord,
    /// Distinguishes this record from an earlier one with the same key.
    generation: u64,
    /// `None` until the attribute query finishes.
    destinations: Option<Vec<PrinterDestination>>,
}

struct Worker {
    service_type: ServiceType,
    context: BrowserContext,
    token: CancellationToken,
    snapshot: Arc<watch::Sender<BrowserSnapshot>>,
    tracked: Vec<TrackedRecord>,
    pending: HashSet<RecordKey>,
    generation: u64,
}

impl Worker {
    async fn run(mut self) {
        let Some((subscription, object_path)) = self.open().await else {
            self.snapshot.send_replace(BrowserSnapshot::inactive());
            return;
        };
        let Subscription { id, mut signals } = subscription;

        self.snapshot.send_modify(|s| {
            s.state = BrowserState::Browsing;
            s.object_path = Some(object_path.clone());
        });
        info!(service_type = %self.service_type, path = %object_path, "browsing");

        let (tx, mut completions) = mpsc::unbounded_channel();
        loop {
            tokio::select! {
                biased;
                _ = self.token.cancelled() => break,
                Some(completion) = completions.recv() => self.on_completion(completion, &tx),
                signal = signals.recv() => match signal {
                    Some(signal) => {
                        if !self.on_signal(signal, &tx) {
                            break;
                        }
                    }
                    None => {
                        debug!(service_type = %self.service_type, "signal stream closed");
                        break;
                    }
                },
            }
        }

        self.teardown(id, &object_path).await;
    }

    /// Subscribe to signals, then create the browser object.
    async fn open(&self) -> Option<(Subscription, String)> {
        let directory = Arc::clone(&self.context.directory);
        let service_type = self.service_type;

        let subscription = tokio::select! {
            _ = self.token.cancelled() => return None,
            result = directory.subscribe(service_type) => result,
        };
        let subscription = match subscription {
            Ok(subscription) => subscription,
            Err(e) => {
                warn!(service_type = %service_type, error = %e, "signal subscription failed");
                return None;
            }
        };

        let created = tokio::select! {
            _ = self.token.cancelled() => Err(PrintwatchError::Cancelled),
            result = directory.create_browser(service_type) => result,
        };
        match created {
            Ok(path) => Some((subscription, path)),
            Err(e) => {
                if !e.is_cancelled() {
                    warn!(service_type = %service_type, error = %e, "browser creation failed");
                }
                directory.unsubscribe(subscription.id);
                None
            }
        }
    }

    /// Cancel, unsubscribe, free the browser object, then drop all records.
    async fn teardown(&mut self, id: SubscriptionId, object_path: &str) {
        self.token.cancel();
        self.context.directory.unsubscribe(id);
        if let Err(e) = self.context.directory.free_browser(object_path).await {
            warn!(service_type = %self.service_type, error = %e, "failed to free browser");
        }
        self.tracked.clear();
        self.pending.clear();
        self.snapshot.send_replace(BrowserSnapshot::inactive());
        info!(service_type = %self.service_type, "browser stopped");
    }

    /// Handle one directory signal.  Returns `false` when the browser
    /// should stop.
    fn on_signal(&mut self, signal: DirectorySignal, tx: &mpsc::UnboundedSender<Completion>) -> bool {
        match signal {
            DirectorySignal::ItemNew(announcement) => {
                self.emit(BrowserEventKind::Added, &announcement);
                self.start_resolve(announcement, tx);
            }
            DirectorySignal::ItemRemove(announcement) => {
                self.emit(BrowserEventKind::Removed, &announcement);
                self.evict(&announcement.key());
            }
            DirectorySignal::AllForNow => {
                debug!(service_type = %self.service_type, "all for now");
                self.snapshot.send_modify(|s| s.state = BrowserState::AllForNow);
            }
            DirectorySignal::Failure(reason) => {
                warn!(service_type = %self.service_type, reason = %reason, "browser failed");
                return false;
            }
        }
        self.publish();
        true
    }

    fn emit(&self, kind: BrowserEventKind, announcement: &Announcement) {
        // No receivers is fine.
        let _ = self.context.events.send(BrowserEvent {
            kind,
            browser: self.service_type,
            name: announcement.name.clone(),
            announced_type: announcement.service_type.to_string(),
            domain: announcement.domain.clone(),
        });
    }

    fn is_tracked(&self, key: &RecordKey) -> bool {
        self.tracked.iter().any(|t| &t.record.key() == key)
    }

    fn start_resolve(&mut self, announcement: Announcement, tx: &mpsc::UnboundedSender<Completion>) {
        let key = announcement.key();
        if self.is_tracked(&key) || self.pending.contains(&key) {
            debug!(key = %key, "already tracked or resolving");
            return;
        }
        self.pending.insert(key.clone());

        let directory = Arc::clone(&self.context.directory);
        let timeout = self.context.resolve_timeout;
        let token = self.token.child_token();
        let weak = tx.downgrade();
        tokio::spawn(async move {
            let result = tokio::select! {
                _ = token.cancelled() => return,
                result = resolver::resolve(directory.as_ref(), &announcement, timeout) => result,
            };
            post(&token, &weak, Completion::Resolved { key, result });
        });
    }

    fn on_completion(&mut self, completion: Completion, tx: &mpsc::UnboundedSender<Completion>) {
        match completion {
            Completion::Resolved { key, result } => {
                if !self.pending.remove(&key) || self.is_tracked(&key) {
                    debug!(key = %key, "discarding stale resolve");
                    return;
                }
                match result {
                    Ok(record) => self.track(record, tx),
                    Err(e) if e.is_cancelled() => {}
                    Err(e) => warn!(key = %key, error = %e, "resolve failed"),
                }
            }
            Completion::Fetched {
                key,
                generation,
                destinations,
            } => {
                let Some(entry) = self
                    .tracked
                    .iter_mut()
                    .find(|t| t.generation == generation && t.record.key() == key)
                else {
                    debug!(key = %key, "discarding query for evicted record");
                    return;
                };
                debug!(key = %key, found = destinations.len(), "query finished");
                entry.destinations = Some(destinations);
            }
        }
        self.publish();
    }

    fn track(&mut self, record: ServiceRecord, tx: &mpsc::UnboundedSender<Completion>) {
        self.generation += 1;
        let generation = self.generation;
        let key = record.key();
        info!(key = %key, host = %record.uri_host(), port = record.port, "tracking service");

        let fetcher = self.context.fetcher.clone();
        let token = self.token.child_token();
        let weak = tx.downgrade();
        let query = record.clone();
        tokio::spawn(async move {
            let destinations = tokio::select! {
                _ = token.cancelled() => return,
                destinations = fetcher.collect(&query) => destinations,
            };
            post(&token, &weak, Completion::Fetched { key, generation, destinations });
        });

        self.tracked.push(TrackedRecord {
            record,
            generation,
            destinations: None,
        });
    }

    fn evict(&mut self, key: &RecordKey) {
        self.pending.remove(key);
        match self.tracked.iter().position(|t| &t.record.key() == key) {
            Some(index) => {
                self.tracked.remove(index);
                info!(key = %key, "service removed");
            }
            None => debug!(key = %key, "ignoring removal of unknown service"),
        }
    }

    fn publish(&self) {
        let in_flight = self.pending.len()
            + self
                .tracked
                .iter()
                .filter(|t| t.destinations.is_none())
                .count();
        let destinations: Vec<PrinterDestination> = self
            .tracked
            .iter()
            .filter_map(|t| t.destinations.as_ref())
            .flatten()
            .cloned()
            .collect();
        let tracked_records = self.tracked.len();

        self.snapshot.send_modify(|s| {
            s.tracked_records = tracked_records;
            s.in_flight = in_flight;
            s.destinations = destinations;
        });
    }
}

/// Deliver a completion unless the browser has been cancelled or is gone.
fn post(token: &CancellationToken, weak: &mpsc::WeakUnboundedSender<Completion>, completion: Completion) {
    if token.is_cancelled() {
        return;
    }
    if let Some(tx) = weak.upgrade() {
        let _ = tx.send(completion);
    }
}
