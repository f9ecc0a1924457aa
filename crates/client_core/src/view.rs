//! Reconciled local snapshot of the registry as seen by the bound identity.
//!
//! [`ViewStore`] is the only writer of [`ViewState`]. Readers hold a
//! `watch::Receiver` and never see a partially applied sync.

use std::{
    collections::{HashMap, HashSet},
    sync::atomic::{AtomicU64, Ordering},
};

use chrono::{DateTime, Utc};
use shared::domain::{Candidate, CandidateId, Identity, Role};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::VotingError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    AddCandidate,
    Vote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MutationPhase {
    #[default]
    Idle,
    Submitting(MutationKind),
    AwaitingConfirmation(MutationKind),
    Resyncing(MutationKind),
}

impl MutationPhase {
    pub fn is_idle(self) -> bool {
        self == MutationPhase::Idle
    }

    /// Submitting or awaiting confirmation: the registry may still change.
    pub fn is_pending(self) -> bool {
        matches!(
            self,
            MutationPhase::Submitting(_) | MutationPhase::AwaitingConfirmation(_)
        )
    }

    pub fn kind(self) -> Option<MutationKind> {
        match self {
            MutationPhase::Idle => None,
            MutationPhase::Submitting(kind)
            | MutationPhase::AwaitingConfirmation(kind)
            | MutationPhase::Resyncing(kind) => Some(kind),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SyncScope {
    Roster,
    Full,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewState {
    pub identity: Option<Identity>,
    /// `None` until the first full sync of the current session.
    pub role: Option<Role>,
    pub has_voted: bool,
    pub candidates: Vec<Candidate>,
    pub mutation: MutationPhase,
    /// Identity-binding generation; bumped on every bind and unbind.
    pub session: u64,
    /// Highest token committed by any sync cycle.
    pub last_sync_token: u64,
    /// Token of the cycle that last set `role` and `has_voted`.
    pub last_full_token: u64,
    /// Token of the cycle that last set `candidates`.
    pub last_roster_token: u64,
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl ViewState {
    pub fn is_admin(&self) -> bool {
        self.role == Some(Role::Admin)
    }

    pub fn can_vote(&self) -> bool {
        self.identity.is_some()
            && self.role == Some(Role::Voter)
            && !self.has_voted
            && self.mutation.is_idle()
    }

    pub fn candidate(&self, id: CandidateId) -> Option<&Candidate> {
        self.candidates.iter().find(|candidate| candidate.id == id)
    }

    pub fn total_votes(&self) -> u64 {
        self.candidates.iter().map(|candidate| candidate.vote_count).sum()
    }
}

/// Permission to commit one sync cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncTicket {
    pub session: u64,
    pub token: u64,
    pub identity: Identity,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncPayload {
    Full {
        role: Role,
        has_voted: bool,
        candidates: Vec<Candidate>,
    },
    Roster {
        candidates: Vec<Candidate>,
    },
}

impl SyncPayload {
    pub fn scope(&self) -> SyncScope {
        match self {
            SyncPayload::Full { .. } => SyncScope::Full,
            SyncPayload::Roster { .. } => SyncScope::Roster,
        }
    }

    fn candidates(&self) -> &[Candidate] {
        match self {
            SyncPayload::Full { candidates, .. } | SyncPayload::Roster { candidates } => {
                candidates
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleReason {
    SessionChanged,
    Superseded { last_committed: u64 },
    RosterRegressed { candidate_id: CandidateId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Applied,
    Discarded(StaleReason),
}

pub struct ViewStore {
    state: watch::Sender<ViewState>,
    next_token: AtomicU64,
}

impl Default for ViewStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ViewStore {
    pub fn new() -> Self {
        let (state, _) = watch::channel(ViewState::default());
        Self {
            state,
            next_token: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ViewState> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> ViewState {
        self.state.borrow().clone()
    }

    /// Resets derived state for `identity` and returns the new session.
    pub(crate) fn bind(&self, identity: Identity) -> u64 {
        let mut session = 0;
        self.state.send_modify(|view| {
            view.session += 1;
            view.identity = Some(identity);
            view.role = None;
            view.has_voted = false;
            view.candidates.clear();
            view.last_synced_at = None;
            session = view.session;
        });
        session
    }

    /// Reverts to the empty view and returns the new session.
    pub(crate) fn unbind(&self) -> u64 {
        let mut session = 0;
        self.state.send_modify(|view| {
            view.session += 1;
            view.identity = None;
            view.role = None;
            view.has_voted = false;
            view.candidates.clear();
            view.last_synced_at = None;
            session = view.session;
        });
        session
    }

    /// Issues a ticket for a new sync cycle, or `None` if no identity is bound
    /// or `expected_session` is no longer current.
    pub(crate) fn issue_ticket(&self, expected_session: Option<u64>) -> Option<SyncTicket> {
        let view = self.state.borrow();
        let identity = view.identity.clone()?;
        if expected_session.is_some_and(|session| session != view.session) {
            return None;
        }
        let token = self.next_token.fetch_add(1, Ordering::SeqCst) + 1;
        Some(SyncTicket {
            session: view.session,
            token,
            identity,
        })
    }

    /// Commits a sync result for the current session.
    ///
    /// The account part of a Full payload (role and eligibility) and the
    /// roster are fenced by separate tokens, so a roster-only cycle that
    /// overtakes a Full one never causes the account part to be lost.
    pub(crate) fn commit(&self, ticket: &SyncTicket, payload: SyncPayload) -> CommitOutcome {
        let mut outcome = CommitOutcome::Applied;
        self.state.send_if_modified(|view| {
            if view.session != ticket.session {
                outcome = CommitOutcome::Discarded(StaleReason::SessionChanged);
                return false;
            }

            let roster = check_roster(view, ticket.token, payload.candidates());
            let (account, candidates) = match payload {
                SyncPayload::Full {
                    role,
                    has_voted,
                    candidates,
                } => (
                    (ticket.token > view.last_full_token).then_some((role, has_voted)),
                    candidates,
                ),
                SyncPayload::Roster { candidates } => (None, candidates),
            };
            if account.is_none() {
                if let Err(reason) = roster {
                    outcome = CommitOutcome::Discarded(reason);
                    return false;
                }
            }

            if let Some((role, has_voted)) = account {
                if view.has_voted && !has_voted {
                    warn!(
                        identity = %ticket.identity,
                        token = ticket.token,
                        "sync: registry reports no vote after one was observed; keeping voted"
                    );
                }
                view.role = Some(role);
                view.has_voted |= has_voted;
                view.last_full_token = ticket.token;
            }
            match roster {
                Ok(()) => {
                    view.candidates = candidates;
                    view.last_roster_token = ticket.token;
                }
                Err(reason) => {
                    debug!(token = ticket.token, ?reason, "sync: kept newer roster");
                }
            }
            view.last_sync_token = view.last_sync_token.max(ticket.token);
            view.last_synced_at = Some(Utc::now());
            true
        });

        if let CommitOutcome::Discarded(reason) = outcome {
            debug!(token = ticket.token, ?reason, "sync: discarded stale result");
        }
        outcome
    }

    /// Local fast path for a `Voted` notification naming the bound identity.
    pub(crate) fn mark_voted(&self, session: u64, voter: &Identity) -> bool {
        self.state.send_if_modified(|view| {
            let matches = view.session == session
                && view.identity.as_ref() == Some(voter)
                && !view.has_voted;
            if matches {
                view.has_voted = true;
            }
            matches
        })
    }

    /// Moves `Idle -> Submitting(kind)` if `precondition` holds on the current view.
    pub(crate) fn begin_mutation(
        &self,
        kind: MutationKind,
        precondition: impl FnOnce(&ViewState) -> Result<(), VotingError>,
    ) -> Result<u64, VotingError> {
        let mut result = Err(VotingError::MutationInProgress);
        self.state.send_if_modified(|view| {
            if !view.mutation.is_idle() {
                return false;
            }
            if let Err(err) = precondition(view) {
                result = Err(err);
                return false;
            }
            view.mutation = MutationPhase::Submitting(kind);
            result = Ok(view.session);
            true
        });
        result
    }

    pub(crate) fn set_mutation_phase(&self, phase: MutationPhase) {
        self.state.send_if_modified(|view| {
            let changed = view.mutation != phase;
            view.mutation = phase;
            changed
        });
    }

    pub fn mutation_phase(&self) -> MutationPhase {
        self.state.borrow().mutation
    }
}

fn check_roster(view: &ViewState, token: u64, candidates: &[Candidate]) -> Result<(), StaleReason> {
    if token <= view.last_roster_token {
        return Err(StaleReason::Superseded {
            last_committed: view.last_roster_token,
        });
    }

    let incoming: HashMap<CandidateId, u64> = candidates
        .iter()
        .map(|candidate| (candidate.id, candidate.vote_count))
        .collect();
    for known in &view.candidates {
        match incoming.get(&known.id) {
            Some(count) if *count >= known.vote_count => {}
            _ => {
                return Err(StaleReason::RosterRegressed {
                    candidate_id: known.id,
                })
            }
        }
    }
    Ok(())
}

/// Checks the registry's roster for the invariants the view relies on.
pub(crate) fn validate_roster(candidates: &[Candidate]) -> Result<(), VotingError> {
    let mut seen = HashSet::with_capacity(candidates.len());
    for candidate in candidates {
        if !seen.insert(candidate.id) {
            return Err(VotingError::SyncFailed(format!(
                "registry returned duplicate candidate id {}",
                candidate.id
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "tests/view_tests.rs"]
mod tests;
