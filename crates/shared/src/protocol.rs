use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::{Candidate, CandidateId, Identity};

/// State-changing call against the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum RegistryCall {
    AddCandidate { name: String },
    Vote { candidate_id: CandidateId },
}

impl RegistryCall {
    pub fn method(&self) -> &'static str {
        match self {
            RegistryCall::AddCandidate { .. } => "addCandidate",
            RegistryCall::Vote { .. } => "vote",
        }
    }
}

/// A call authorized by the identity provider on behalf of `from`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedCall {
    pub from: Identity,
    pub call: RegistryCall,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxHash(pub String);

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Receipt {
    Confirmed,
    Reverted { reason: String },
}

/// Receipt lookup response; `Pending` until the transaction is included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReceiptStatus {
    Pending,
    Confirmed,
    Reverted { reason: String },
}

impl ReceiptStatus {
    pub fn into_receipt(self) -> Option<Receipt> {
        match self {
            ReceiptStatus::Pending => None,
            ReceiptStatus::Confirmed => Some(Receipt::Confirmed),
            ReceiptStatus::Reverted { reason } => Some(Receipt::Reverted { reason }),
        }
    }
}

impl From<Option<Receipt>> for ReceiptStatus {
    fn from(value: Option<Receipt>) -> Self {
        match value {
            None => ReceiptStatus::Pending,
            Some(Receipt::Confirmed) => ReceiptStatus::Confirmed,
            Some(Receipt::Reverted { reason }) => ReceiptStatus::Reverted { reason },
        }
    }
}

/// Notification emitted by the registry after a confirmed mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum RegistryEvent {
    CandidateAdded {
        candidate_id: CandidateId,
        name: String,
    },
    Voted {
        voter: Identity,
        candidate_id: CandidateId,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminResponse {
    pub admin: Identity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HasVotedResponse {
    pub has_voted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendTransactionResponse {
    pub tx_hash: TxHash,
}

pub type CandidatesResponse = Vec<Candidate>;
