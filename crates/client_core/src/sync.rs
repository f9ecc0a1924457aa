use std::sync::Arc;

use futures::future::try_join3;
use shared::domain::Role;
use tracing::{debug, info, warn};

use crate::{
    error::VotingError,
    registry::RegistryClient,
    view::{validate_roster, CommitOutcome, StaleReason, SyncPayload, SyncScope, ViewStore},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Committed { token: u64, scope: SyncScope },
    Discarded { token: u64, reason: StaleReason },
}

impl SyncOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, SyncOutcome::Committed { .. })
    }
}

/// Runs sync cycles: independent queries, committed together or not at all.
#[derive(Clone)]
pub struct SyncEngine {
    registry: RegistryClient,
    store: Arc<ViewStore>,
}

impl SyncEngine {
    pub fn new(registry: RegistryClient, store: Arc<ViewStore>) -> Self {
        Self { registry, store }
    }

    /// Syncs against whatever identity is currently bound.
    pub async fn sync(&self, scope: SyncScope) -> Result<SyncOutcome, VotingError> {
        self.run(None, scope).await
    }

    /// Syncs only if `session` is still the current identity session.
    pub async fn sync_session(
        &self,
        session: u64,
        scope: SyncScope,
    ) -> Result<SyncOutcome, VotingError> {
        self.run(Some(session), scope).await
    }

    async fn run(
        &self,
        session: Option<u64>,
        scope: SyncScope,
    ) -> Result<SyncOutcome, VotingError> {
        let Some(ticket) = self.store.issue_ticket(session) else {
            return Err(VotingError::NotConnected);
        };
        debug!(
            token = ticket.token,
            session = ticket.session,
            ?scope,
            "sync: cycle started"
        );

        let payload = match scope {
            SyncScope::Full => {
                let (admin, has_voted, candidates) = try_join3(
                    self.registry.get_admin(),
                    self.registry.has_voted(&ticket.identity),
                    self.registry.get_candidates(),
                )
                .await
                .map_err(|err| sync_failed(ticket.token, err))?;
                SyncPayload::Full {
                    role: Role::derive(&ticket.identity, &admin),
                    has_voted,
                    candidates,
                }
            }
            SyncScope::Roster => {
                let candidates = self
                    .registry
                    .get_candidates()
                    .await
                    .map_err(|err| sync_failed(ticket.token, err))?;
                SyncPayload::Roster { candidates }
            }
        };

        if let SyncPayload::Full { candidates, .. } | SyncPayload::Roster { candidates } =
            &payload
        {
            validate_roster(candidates)?;
        }

        match self.store.commit(&ticket, payload) {
            CommitOutcome::Applied => {
                info!(token = ticket.token, ?scope, "sync: committed");
                Ok(SyncOutcome::Committed {
                    token: ticket.token,
                    scope,
                })
            }
            CommitOutcome::Discarded(reason) => Ok(SyncOutcome::Discarded {
                token: ticket.token,
                reason,
            }),
        }
    }
}

fn sync_failed(token: u64, err: impl std::fmt::Display) -> VotingError {
    warn!(token, "sync: query failed: {err}");
    VotingError::SyncFailed(err.to_string())
}

#[cfg(test)]
#[path = "tests/sync_tests.rs"]
mod tests;
