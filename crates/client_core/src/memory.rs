//! Provides [MemoryRegistry] to run the voting registry in memory.
//!
//! # Differences with a real registry
//!
//! * Every accepted transaction is applied immediately and gets a receipt,
//!   unless receipts are held with [MemoryRegistry::hold_receipts].
//! * Transaction hashes are sequential, not content hashes.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;
use futures::StreamExt;
use shared::{
    domain::{Candidate, CandidateId, Identity},
    protocol::{Receipt, RegistryCall, RegistryEvent, SignedCall, TxHash},
};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::debug;

use crate::registry::{EventStream, RegistryBackend, RegistryError};

/// Number of backend calls observed, per operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub admin: usize,
    pub candidates: usize,
    pub has_voted: usize,
    pub send_transaction: usize,
    pub subscribe: usize,
}

#[derive(Clone)]
pub struct MemoryRegistry {
    state: Arc<Mutex<LedgerState>>,
    events: broadcast::Sender<RegistryEvent>,
}

struct LedgerState {
    admin: Identity,
    candidates: Vec<Candidate>,
    voters: HashSet<Identity>,
    receipts: HashMap<TxHash, Receipt>,
    held: Vec<(TxHash, SignedCall)>,
    hold_receipts: bool,
    next_tx: u64,
    failing_reads: usize,
    last_event: Option<RegistryEvent>,
    calls: CallCounts,
}

impl MemoryRegistry {
    /// Creates an empty registry deployed by `admin`.
    pub fn new(admin: Identity) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            state: Arc::new(Mutex::new(LedgerState {
                admin,
                candidates: Vec::new(),
                voters: HashSet::new(),
                receipts: HashMap::new(),
                held: Vec::new(),
                hold_receipts: false,
                next_tx: 0,
                failing_reads: 0,
                last_event: None,
                calls: CallCounts::default(),
            })),
            events,
        }
    }

    pub fn calls(&self) -> CallCounts {
        self.lock().calls
    }

    pub fn candidates_snapshot(&self) -> Vec<Candidate> {
        self.lock().candidates.clone()
    }

    /// Makes the next `count` read calls fail with a transport error.
    pub fn fail_next_reads(&self, count: usize) {
        self.lock().failing_reads = count;
    }

    /// Keeps submitted transactions pending until [MemoryRegistry::release_held].
    pub fn hold_receipts(&self, hold: bool) {
        self.lock().hold_receipts = hold;
    }

    /// Applies every held transaction in submission order.
    pub fn release_held(&self) {
        let (held, emitted) = {
            let mut state = self.lock();
            let held = std::mem::take(&mut state.held);
            let mut emitted = Vec::new();
            for (tx_hash, signed) in held.iter() {
                let (receipt, event) = state.apply(signed);
                state.receipts.insert(tx_hash.clone(), receipt);
                emitted.extend(event);
            }
            (held.len(), emitted)
        };
        debug!(count = held, "memory registry: released held transactions");
        for event in emitted {
            self.publish(event);
        }
    }

    /// Delivers the most recent event again.
    pub fn redeliver_last_event(&self) {
        let last = self.lock().last_event.clone();
        if let Some(event) = last {
            let _ = self.events.send(event);
        }
    }

    /// Publishes an arbitrary event without touching ledger state.
    pub fn emit(&self, event: RegistryEvent) {
        self.publish(event);
    }

    fn publish(&self, event: RegistryEvent) {
        self.lock().last_event = Some(event.clone());
        let _ = self.events.send(event);
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn read<T>(
        &self,
        count: impl FnOnce(&mut CallCounts),
        query: impl FnOnce(&LedgerState) -> T,
    ) -> Result<T, RegistryError> {
        let mut state = self.lock();
        count(&mut state.calls);
        if state.failing_reads > 0 {
            state.failing_reads -= 1;
            return Err(RegistryError::Transport("injected read failure".into()));
        }
        Ok(query(&state))
    }
}

impl LedgerState {
    fn apply(&mut self, signed: &SignedCall) -> (Receipt, Option<RegistryEvent>) {
        match &signed.call {
            RegistryCall::AddCandidate { name } => {
                if signed.from != self.admin {
                    return reverted("only admin can add candidates");
                }
                if name.trim().is_empty() {
                    return reverted("candidate name is empty");
                }
                let candidate_id = CandidateId(self.candidates.len() as u64);
                self.candidates.push(Candidate {
                    id: candidate_id,
                    name: name.clone(),
                    vote_count: 0,
                });
                (
                    Receipt::Confirmed,
                    Some(RegistryEvent::CandidateAdded {
                        candidate_id,
                        name: name.clone(),
                    }),
                )
            }
            RegistryCall::Vote { candidate_id } => {
                if self.voters.contains(&signed.from) {
                    return reverted("already voted");
                }
                let Some(candidate) = self
                    .candidates
                    .iter_mut()
                    .find(|candidate| candidate.id == *candidate_id)
                else {
                    return reverted("invalid candidate");
                };
                candidate.vote_count += 1;
                self.voters.insert(signed.from.clone());
                (
                    Receipt::Confirmed,
                    Some(RegistryEvent::Voted {
                        voter: signed.from.clone(),
                        candidate_id: *candidate_id,
                    }),
                )
            }
        }
    }
}

fn reverted(reason: &str) -> (Receipt, Option<RegistryEvent>) {
    (
        Receipt::Reverted {
            reason: reason.to_string(),
        },
        None,
    )
}

#[async_trait]
impl RegistryBackend for MemoryRegistry {
    async fn admin(&self) -> Result<Identity, RegistryError> {
        self.read(|calls| calls.admin += 1, |state| state.admin.clone())
    }

    async fn candidates(&self) -> Result<Vec<Candidate>, RegistryError> {
        self.read(
            |calls| calls.candidates += 1,
            |state| state.candidates.clone(),
        )
    }

    async fn has_user_voted(&self, voter: &Identity) -> Result<bool, RegistryError> {
        self.read(
            |calls| calls.has_voted += 1,
            |state| state.voters.contains(voter),
        )
    }

    async fn send_transaction(&self, signed: SignedCall) -> Result<TxHash, RegistryError> {
        let (tx_hash, event) = {
            let mut state = self.lock();
            state.calls.send_transaction += 1;
            state.next_tx += 1;
            let tx_hash = TxHash(format!("0x{:064x}", state.next_tx));
            if state.hold_receipts {
                state.held.push((tx_hash.clone(), signed));
                (tx_hash, None)
            } else {
                let (receipt, event) = state.apply(&signed);
                state.receipts.insert(tx_hash.clone(), receipt);
                (tx_hash, event)
            }
        };
        if let Some(event) = event {
            self.publish(event);
        }
        Ok(tx_hash)
    }

    async fn transaction_receipt(
        &self,
        tx_hash: &TxHash,
    ) -> Result<Option<Receipt>, RegistryError> {
        Ok(self.lock().receipts.get(tx_hash).cloned())
    }

    async fn subscribe(&self) -> Result<EventStream, RegistryError> {
        self.lock().calls.subscribe += 1;
        let stream = BroadcastStream::new(self.events.subscribe())
            .map(|item| item.map_err(|err| RegistryError::Subscription(err.to_string())));
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
#[path = "tests/memory_tests.rs"]
mod tests;
