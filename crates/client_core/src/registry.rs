//! Typed façade over the registry's read and write operations.
//!
//! [`RegistryBackend`] is the raw interface the ledger-backed registry
//! exposes. [`RegistryClient`] adds the signing step for writes and turns
//! submissions into [`MutationHandle`]s that must be awaited to confirmation.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::stream::BoxStream;
use shared::{
    domain::{Candidate, CandidateId, Identity},
    error::ApiError,
    protocol::{Receipt, RegistryCall, RegistryEvent, SignedCall, TxHash},
};
use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};
use wallet::IdentityProvider;

use crate::{config::ClientConfig, error::VotingError};

pub type EventStream = BoxStream<'static, Result<RegistryEvent, RegistryError>>;

#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    #[error("registry transport failure: {0}")]
    Transport(String),
    #[error("registry refused the request: {0}")]
    Api(#[from] ApiError),
    #[error("unexpected registry response: {0}")]
    Decode(String),
    #[error("event subscription failure: {0}")]
    Subscription(String),
}

#[async_trait]
pub trait RegistryBackend: Send + Sync {
    async fn admin(&self) -> Result<Identity, RegistryError>;
    async fn candidates(&self) -> Result<Vec<Candidate>, RegistryError>;
    async fn has_user_voted(&self, voter: &Identity) -> Result<bool, RegistryError>;
    async fn send_transaction(&self, signed: SignedCall) -> Result<TxHash, RegistryError>;
    /// `None` while the transaction is still pending.
    async fn transaction_receipt(&self, tx_hash: &TxHash)
        -> Result<Option<Receipt>, RegistryError>;
    async fn subscribe(&self) -> Result<EventStream, RegistryError>;
}

#[derive(Clone)]
pub struct RegistryClient {
    backend: Arc<dyn RegistryBackend>,
    provider: Arc<dyn IdentityProvider>,
    confirmation_timeout: Duration,
    poll_interval: Duration,
}

impl RegistryClient {
    pub fn new(
        backend: Arc<dyn RegistryBackend>,
        provider: Arc<dyn IdentityProvider>,
        config: &ClientConfig,
    ) -> Self {
        Self {
            backend,
            provider,
            confirmation_timeout: config.confirmation_timeout,
            poll_interval: config.receipt_poll_interval,
        }
    }

    pub async fn get_admin(&self) -> Result<Identity, RegistryError> {
        self.backend.admin().await
    }

    pub async fn get_candidates(&self) -> Result<Vec<Candidate>, RegistryError> {
        self.backend.candidates().await
    }

    pub async fn has_voted(&self, voter: &Identity) -> Result<bool, RegistryError> {
        self.backend.has_user_voted(voter).await
    }

    pub async fn subscribe(&self) -> Result<EventStream, RegistryError> {
        self.backend.subscribe().await
    }

    pub async fn submit_add_candidate(&self, name: &str) -> Result<MutationHandle, VotingError> {
        self.submit(RegistryCall::AddCandidate {
            name: name.to_string(),
        })
        .await
    }

    pub async fn submit_vote(&self, candidate_id: CandidateId) -> Result<MutationHandle, VotingError> {
        self.submit(RegistryCall::Vote { candidate_id }).await
    }

    async fn submit(&self, call: RegistryCall) -> Result<MutationHandle, VotingError> {
        let signer = self
            .provider
            .signing_context()
            .await
            .map_err(|err| VotingError::SubmissionFailed(err.to_string()))?;
        let signed = signer
            .sign(call.clone())
            .await
            .map_err(|err| VotingError::SubmissionFailed(err.to_string()))?;
        let from = signed.from.clone();

        let tx_hash = self
            .backend
            .send_transaction(signed)
            .await
            .map_err(classify_submission_error)?;
        info!(
            %tx_hash,
            %from,
            method = call.method(),
            "registry: transaction submitted"
        );

        Ok(MutationHandle {
            tx_hash,
            call,
            backend: Arc::clone(&self.backend),
            timeout: self.confirmation_timeout,
            poll_interval: self.poll_interval,
        })
    }
}

fn classify_submission_error(err: RegistryError) -> VotingError {
    match err {
        RegistryError::Api(api) if api.code.is_rejection() => {
            VotingError::MutationRejected(api.message)
        }
        other => VotingError::SubmissionFailed(other.to_string()),
    }
}

/// A submitted, not yet confirmed registry mutation.
pub struct MutationHandle {
    tx_hash: TxHash,
    call: RegistryCall,
    backend: Arc<dyn RegistryBackend>,
    timeout: Duration,
    poll_interval: Duration,
}

impl MutationHandle {
    pub fn tx_hash(&self) -> &TxHash {
        &self.tx_hash
    }

    pub fn call(&self) -> &RegistryCall {
        &self.call
    }

    /// Waits for the registry to include the transaction.
    ///
    /// Receipt lookups that fail are retried until the confirmation timeout;
    /// the transaction has already been broadcast and cannot be withdrawn.
    pub async fn await_confirmation(&self) -> Result<(), VotingError> {
        let deadline = Instant::now() + self.timeout;
        loop {
            match self.backend.transaction_receipt(&self.tx_hash).await {
                Ok(Some(Receipt::Confirmed)) => {
                    info!(tx_hash = %self.tx_hash, "registry: transaction confirmed");
                    return Ok(());
                }
                Ok(Some(Receipt::Reverted { reason })) => {
                    warn!(tx_hash = %self.tx_hash, %reason, "registry: transaction reverted");
                    return Err(VotingError::MutationRejected(reason));
                }
                Ok(None) => debug!(tx_hash = %self.tx_hash, "registry: transaction pending"),
                Err(err) => {
                    warn!(tx_hash = %self.tx_hash, "registry: receipt lookup failed: {err}")
                }
            }

            if Instant::now() >= deadline {
                return Err(VotingError::ConfirmationTimeout {
                    tx_hash: self.tx_hash.clone(),
                });
            }
            sleep(self.poll_interval).await;
        }
    }
}

#[cfg(test)]
#[path = "tests/registry_tests.rs"]
mod tests;
