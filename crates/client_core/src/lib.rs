//! Client-side core of the voting registry client.
//!
//! [`VotingSession`] wires the pieces together: [`IdentityBinding`] decides who
//! is acting, [`SyncEngine`] reconciles [`ViewState`] with the registry,
//! [`ChangeFeed`] re-syncs on registry notifications and
//! [`MutationCoordinator`] runs add-candidate and vote intents one at a time.

use std::sync::Arc;

use shared::{
    domain::{CandidateId, Identity},
    protocol::{RegistryCall, RegistryEvent, TxHash},
};
use tokio::sync::{broadcast, watch, Mutex};
use tracing::{info, warn};
use wallet::IdentityProvider;

pub mod change_feed;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod http_registry;
pub mod identity;
pub mod memory;
pub mod registry;
pub mod sync;
pub mod view;

#[cfg(test)]
mod test_support;

pub use change_feed::ChangeFeed;
pub use config::ClientConfig;
pub use coordinator::{MutationCoordinator, MutationReport};
pub use error::{ErrorKind, ErrorLayer, VotingError};
pub use http_registry::HttpRegistry;
pub use identity::{BindOutcome, IdentityBinding};
pub use memory::MemoryRegistry;
pub use registry::{MutationHandle, RegistryBackend, RegistryClient, RegistryError};
pub use sync::{SyncEngine, SyncOutcome};
pub use view::{MutationKind, MutationPhase, SyncScope, ViewState, ViewStore};

#[derive(Debug, Clone)]
pub enum ClientEvent {
    IdentityChanged(Option<Identity>),
    Synced { token: u64, scope: SyncScope },
    SyncWarning(String),
    MutationConfirmed { tx_hash: TxHash, call: RegistryCall },
    Notification(RegistryEvent),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectReport {
    pub identity: Identity,
    /// Set when the initial sync failed; the identity is bound regardless.
    pub sync_warning: Option<VotingError>,
}

pub struct VotingSession {
    registry: RegistryClient,
    identity: IdentityBinding,
    store: Arc<ViewStore>,
    engine: SyncEngine,
    coordinator: MutationCoordinator,
    feed: Mutex<Option<ChangeFeed>>,
    events: broadcast::Sender<ClientEvent>,
    config: ClientConfig,
}

impl VotingSession {
    pub fn new(
        backend: Arc<dyn RegistryBackend>,
        provider: Arc<dyn IdentityProvider>,
        config: ClientConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_buffer.max(1));
        let registry = RegistryClient::new(backend, Arc::clone(&provider), &config);
        let store = Arc::new(ViewStore::new());
        let engine = SyncEngine::new(registry.clone(), Arc::clone(&store));
        let coordinator = MutationCoordinator::new(
            registry.clone(),
            engine.clone(),
            Arc::clone(&store),
            events.clone(),
        );
        Self {
            registry,
            identity: IdentityBinding::new(provider),
            store,
            engine,
            coordinator,
            feed: Mutex::new(None),
            events,
            config,
        }
    }

    /// Binds the provider's active account, subscribes to notifications and
    /// runs the initial full sync.
    pub async fn connect(&self) -> Result<ConnectReport, VotingError> {
        let outcome = self.identity.connect().await?;
        let identity = outcome.identity().clone();

        let session = {
            let mut feed = self.feed.lock().await;
            let live_feed = feed.as_ref().is_some_and(|feed| !feed.is_finished());
            match (&outcome, live_feed) {
                (BindOutcome::Unchanged(_), true) => self.store.snapshot().session,
                _ => {
                    feed.take();
                    let session = self.store.bind(identity.clone());
                    let _ = self
                        .events
                        .send(ClientEvent::IdentityChanged(Some(identity.clone())));
                    // Subscribed before the initial sync reads anything.
                    let stream = match self.registry.subscribe().await {
                        Ok(stream) => Some(stream),
                        Err(err) => {
                            warn!(%identity, "session: subscribe failed, feed will retry: {err}");
                            None
                        }
                    };
                    *feed = Some(ChangeFeed::spawn(
                        self.registry.clone(),
                        self.engine.clone(),
                        Arc::clone(&self.store),
                        self.events.clone(),
                        self.config.clone(),
                        identity.clone(),
                        session,
                        stream,
                    ));
                    session
                }
            }
        };

        let sync_warning = match self.engine.sync_session(session, SyncScope::Full).await {
            Ok(_) => None,
            Err(err) => {
                warn!(%identity, "session: initial sync failed: {err}");
                let _ = self.events.send(ClientEvent::SyncWarning(err.to_string()));
                Some(err)
            }
        };
        info!(%identity, session, "session: connected");
        Ok(ConnectReport {
            identity,
            sync_warning,
        })
    }

    /// Unbinds the identity, drops its subscription and empties the view.
    pub async fn disconnect(&self) {
        self.feed.lock().await.take();
        if self.identity.disconnect().is_some() {
            self.store.unbind();
            let _ = self.events.send(ClientEvent::IdentityChanged(None));
        }
    }

    pub async fn refresh(&self) -> Result<SyncOutcome, VotingError> {
        self.engine.sync(SyncScope::Full).await
    }

    pub async fn add_candidate(&self, name: &str) -> Result<MutationReport, VotingError> {
        self.coordinator.add_candidate(name).await
    }

    pub async fn vote(&self, candidate_id: CandidateId) -> Result<MutationReport, VotingError> {
        self.coordinator.vote(candidate_id).await
    }

    pub fn identity(&self) -> Option<Identity> {
        self.identity.current()
    }

    pub fn view(&self) -> watch::Receiver<ViewState> {
        self.store.subscribe()
    }

    pub fn snapshot(&self) -> ViewState {
        self.store.snapshot()
    }

    pub fn mutation_phase(&self) -> MutationPhase {
        self.coordinator.phase()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
