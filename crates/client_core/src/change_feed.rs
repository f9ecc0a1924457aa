//! Registry notification subscription for one identity session.
//!
//! A [`ChangeFeed`] owns the task that consumes notifications. Dropping it
//! aborts the task, so a handler never outlives the session it was started
//! for. Sync commits are additionally fenced by the session number, which
//! makes a late handler harmless even before the abort lands.

use std::sync::Arc;

use futures::{FutureExt, StreamExt};
use shared::{domain::Identity, protocol::RegistryEvent};
use tokio::{sync::broadcast, task::JoinHandle, time::sleep};
use tracing::{debug, info, warn};

use crate::{
    config::ClientConfig,
    registry::{EventStream, RegistryClient, RegistryError},
    sync::{SyncEngine, SyncOutcome},
    view::{SyncScope, ViewStore},
    ClientEvent,
};

pub struct ChangeFeed {
    session: u64,
    identity: Identity,
    task: JoinHandle<()>,
}

impl ChangeFeed {
    pub(crate) fn spawn(
        registry: RegistryClient,
        engine: SyncEngine,
        store: Arc<ViewStore>,
        events: broadcast::Sender<ClientEvent>,
        config: ClientConfig,
        identity: Identity,
        session: u64,
        stream: Option<EventStream>,
    ) -> Self {
        let worker = FeedWorker {
            registry,
            engine,
            store,
            events,
            config,
            identity: identity.clone(),
            session,
            consecutive_failures: 0,
        };
        let task = tokio::spawn(worker.run(stream));
        info!(%identity, session, "feed: subscription task started");
        Self {
            session,
            identity,
            task,
        }
    }

    pub fn session(&self) -> u64 {
        self.session
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for ChangeFeed {
    fn drop(&mut self) {
        self.task.abort();
        debug!(identity = %self.identity, session = self.session, "feed: unsubscribed");
    }
}

struct FeedWorker {
    registry: RegistryClient,
    engine: SyncEngine,
    store: Arc<ViewStore>,
    events: broadcast::Sender<ClientEvent>,
    config: ClientConfig,
    identity: Identity,
    session: u64,
    consecutive_failures: u32,
}

impl FeedWorker {
    /// Consumes `stream` if one was opened up front, then keeps resubscribing.
    /// Every subscription not opened before the initial sync is followed by a
    /// full sync, since notifications may have been missed in between.
    async fn run(mut self, mut stream: Option<EventStream>) {
        let mut resubscribing = stream.is_none();
        loop {
            let subscribed = match stream.take() {
                Some(stream) => Ok(stream),
                None => self.registry.subscribe().await,
            };
            match subscribed {
                Ok(stream) => {
                    if resubscribing {
                        self.resync(SyncScope::Full).await;
                    }
                    self.consecutive_failures = 0;
                    self.consume(stream).await;
                    warn!(session = self.session, "feed: notification stream ended");
                }
                Err(err) => {
                    warn!(session = self.session, "feed: subscribe failed: {err}");
                    self.consecutive_failures += 1;
                }
            }
            resubscribing = true;
            let delay = self.config.sync_backoff(self.consecutive_failures.max(1));
            sleep(delay).await;
        }
    }

    async fn consume(&mut self, mut stream: EventStream) {
        while let Some(first) = stream.next().await {
            let mut batch = vec![first];
            while let Some(Some(next)) = stream.next().now_or_never() {
                batch.push(next);
            }

            let mut scope = None;
            for item in batch {
                let needed = match item {
                    Ok(event) => self.on_event(event),
                    Err(err) => self.on_stream_error(err),
                };
                scope = scope.max(Some(needed));
            }
            if let Some(scope) = scope {
                self.resync(scope).await;
            }
        }
    }

    fn on_event(&self, event: RegistryEvent) -> SyncScope {
        debug!(session = self.session, ?event, "feed: notification");
        let scope = match &event {
            RegistryEvent::CandidateAdded { .. } => SyncScope::Roster,
            RegistryEvent::Voted { voter, .. } if *voter == self.identity => {
                if self.store.mark_voted(self.session, voter) {
                    info!(identity = %voter, "feed: own vote observed");
                }
                SyncScope::Full
            }
            RegistryEvent::Voted { .. } => SyncScope::Roster,
        };
        let _ = self.events.send(ClientEvent::Notification(event));
        scope
    }

    fn on_stream_error(&self, err: RegistryError) -> SyncScope {
        warn!(session = self.session, "feed: notification error: {err}");
        SyncScope::Full
    }

    async fn resync(&mut self, scope: SyncScope) {
        let backoff = self.config.sync_backoff(self.consecutive_failures);
        if !backoff.is_zero() {
            debug!(?backoff, "feed: delaying sync after failures");
            sleep(backoff).await;
        }

        match self.engine.sync_session(self.session, scope).await {
            Ok(outcome) => {
                self.consecutive_failures = 0;
                if let SyncOutcome::Committed { token, scope } = outcome {
                    let _ = self.events.send(ClientEvent::Synced { token, scope });
                }
            }
            Err(err) => {
                self.consecutive_failures += 1;
                warn!(
                    session = self.session,
                    failures = self.consecutive_failures,
                    "feed: sync failed: {err}"
                );
                let _ = self.events.send(ClientEvent::SyncWarning(err.to_string()));
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/change_feed_tests.rs"]
mod tests;
