// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Service directory boundary.
//
// A directory hands out one signal stream per service type and one browser
// object per service type.  Callers must `subscribe` before
// `create_browser`: a browser starts emitting `ItemNew` immediately and
// anything sent before the subscription exists is lost.

use async_trait::async_trait;
use tokio::sync::mpsc;

use printwatch_core::error::Result;
use printwatch_core::types::{Announcement, ResolvedService, ServiceType};

/// Signals emitted on a browser's subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectorySignal {
    /// A service appeared.
    ItemNew(Announcement),
    /// A service went away.
    ItemRemove(Announcement),
    /// The initial burst of announcements is complete.
    AllForNow,
    /// The browser failed and will emit nothing further.
    Failure(String),
}

/// Handle for an active signal subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// A registered signal subscription.  Dropping the receiver stops delivery;
/// [`ServiceDirectory::unsubscribe`] releases the directory side.
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub signals: mpsc::UnboundedReceiver<DirectorySignal>,
}

/// Multicast service directory (DNS-SD).
#[async_trait]
pub trait ServiceDirectory: Send + Sync + 'static {
    /// Register interest in the signals of `service_type`'s browser.
    async fn subscribe(&self, service_type: ServiceType) -> Result<Subscription>;

    /// Create the browser object for `service_type` and return its path.
    ///
    /// Fails when the directory is unreachable or disabled.
    async fn create_browser(&self, service_type: ServiceType) -> Result<String>;

    /// Resolve an announcement to host, address, port and TXT data.
    async fn resolve(&self, announcement: &Announcement) -> Result<ResolvedService>;

    /// Release a browser object created by [`create_browser`].
    ///
    /// [`create_browser`]: ServiceDirectory::create_browser
    async fn free_browser(&self, object_path: &str) -> Result<()>;

    /// Drop a signal subscription.  Unknown ids are ignored.
    fn unsubscribe(&self, id: SubscriptionId);
}
