//! Serializes state-changing registry operations.
//!
//! ```text
//! Idle -> Submitting -> AwaitingConfirmation -> Resyncing -> Idle
//!             |                  |
//!             +-> Idle (failed)  +-> Idle (rejected)
//! ```
//!
//! The phase lives in [`ViewState::mutation`], so presentation observes it
//! through the same watch channel as the rest of the view.

use std::sync::Arc;

use shared::{
    domain::{CandidateId, Role},
    protocol::{RegistryCall, TxHash},
};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::{
    error::VotingError,
    registry::{MutationHandle, RegistryClient},
    sync::SyncEngine,
    view::{MutationKind, MutationPhase, SyncScope, ViewState, ViewStore},
    ClientEvent,
};

/// Result of a confirmed mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationReport {
    pub tx_hash: TxHash,
    pub call: RegistryCall,
    /// Set when the follow-up sync failed; the mutation itself is confirmed.
    pub sync_warning: Option<VotingError>,
}

#[derive(Clone)]
pub struct MutationCoordinator {
    registry: RegistryClient,
    engine: SyncEngine,
    store: Arc<ViewStore>,
    events: broadcast::Sender<ClientEvent>,
}

/// Returns the coordinator to `Idle` on every exit path.
struct IdleOnDrop(Arc<ViewStore>);

impl Drop for IdleOnDrop {
    fn drop(&mut self) {
        self.0.set_mutation_phase(MutationPhase::Idle);
    }
}

impl MutationCoordinator {
    pub fn new(
        registry: RegistryClient,
        engine: SyncEngine,
        store: Arc<ViewStore>,
        events: broadcast::Sender<ClientEvent>,
    ) -> Self {
        Self {
            registry,
            engine,
            store,
            events,
        }
    }

    pub fn phase(&self) -> MutationPhase {
        self.store.mutation_phase()
    }

    pub async fn add_candidate(&self, name: &str) -> Result<MutationReport, VotingError> {
        let name = name.trim().to_string();
        let kind = MutationKind::AddCandidate;
        let session = self
            .store
            .begin_mutation(kind, |view| check_add_candidate(view, &name))?;
        let _idle = IdleOnDrop(Arc::clone(&self.store));

        let handle = self.registry.submit_add_candidate(&name).await?;
        self.finish(kind, session, handle).await
    }

    pub async fn vote(&self, candidate_id: CandidateId) -> Result<MutationReport, VotingError> {
        let kind = MutationKind::Vote;
        let session = self.store.begin_mutation(kind, check_vote)?;
        let _idle = IdleOnDrop(Arc::clone(&self.store));

        let handle = self.registry.submit_vote(candidate_id).await?;
        self.finish(kind, session, handle).await
    }

    async fn finish(
        &self,
        kind: MutationKind,
        session: u64,
        handle: MutationHandle,
    ) -> Result<MutationReport, VotingError> {
        self.store
            .set_mutation_phase(MutationPhase::AwaitingConfirmation(kind));

        match handle.await_confirmation().await {
            Ok(()) => {}
            Err(err @ VotingError::ConfirmationTimeout { .. }) => {
                // Outcome unknown; refresh so the view shows whatever landed.
                self.store.set_mutation_phase(MutationPhase::Resyncing(kind));
                let _ = self.resync(session).await;
                return Err(err);
            }
            Err(err) => return Err(err),
        }

        let tx_hash = handle.tx_hash().clone();
        let call = handle.call().clone();
        info!(%tx_hash, ?kind, "mutation: confirmed");
        let _ = self.events.send(ClientEvent::MutationConfirmed {
            tx_hash: tx_hash.clone(),
            call: call.clone(),
        });

        self.store.set_mutation_phase(MutationPhase::Resyncing(kind));
        let sync_warning = self.resync(session).await.err();

        Ok(MutationReport {
            tx_hash,
            call,
            sync_warning,
        })
    }

    async fn resync(&self, session: u64) -> Result<(), VotingError> {
        match self.engine.sync_session(session, SyncScope::Full).await {
            Ok(_) => Ok(()),
            // Identity changed mid-flight; the new session syncs on its own.
            Err(VotingError::NotConnected) => Ok(()),
            Err(err) => {
                warn!("mutation: follow-up sync failed: {err}");
                let _ = self.events.send(ClientEvent::SyncWarning(err.to_string()));
                Err(err)
            }
        }
    }
}

fn check_add_candidate(view: &ViewState, name: &str) -> Result<(), VotingError> {
    if view.identity.is_none() {
        return Err(VotingError::NotConnected);
    }
    if view.role != Some(Role::Admin) {
        return Err(VotingError::NotAuthorized);
    }
    if name.is_empty() {
        return Err(VotingError::InvalidCandidateName);
    }
    Ok(())
}

fn check_vote(view: &ViewState) -> Result<(), VotingError> {
    if view.identity.is_none() {
        return Err(VotingError::NotConnected);
    }
    match view.role {
        Some(Role::Voter) => {}
        Some(Role::Admin) => {
            return Err(VotingError::IneligibleToVote(
                "the admin account does not vote".into(),
            ))
        }
        None => {
            return Err(VotingError::IneligibleToVote(
                "role not yet synchronized".into(),
            ))
        }
    }
    if view.has_voted {
        return Err(VotingError::IneligibleToVote("already voted".into()));
    }
    Ok(())
}

#[cfg(test)]
#[path = "tests/coordinator_tests.rs"]
mod tests;
