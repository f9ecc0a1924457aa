use shared::protocol::TxHash;
use thiserror::Error;
use wallet::WalletError;

/// Where an error originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorLayer {
    Identity,
    Registry,
    Local,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ProviderUnavailable,
    AuthorizationDenied,
    MutationRejected,
    SubmissionFailed,
    ConfirmationTimeout,
    SyncFailed,
    MutationInProgress,
    IneligibleToVote,
    InvalidCandidateName,
    NotConnected,
    NotAuthorized,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VotingError {
    #[error("identity provider unavailable: {0}")]
    ProviderUnavailable(String),
    #[error("authorization denied: {0}")]
    AuthorizationDenied(String),
    #[error("registry rejected the mutation: {0}")]
    MutationRejected(String),
    #[error("mutation was not submitted: {0}")]
    SubmissionFailed(String),
    #[error("transaction {tx_hash} was not confirmed in time")]
    ConfirmationTimeout { tx_hash: TxHash },
    #[error("synchronization failed: {0}")]
    SyncFailed(String),
    #[error("another mutation is already in flight")]
    MutationInProgress,
    #[error("not eligible to vote: {0}")]
    IneligibleToVote(String),
    #[error("candidate name must not be empty")]
    InvalidCandidateName,
    #[error("no identity is connected")]
    NotConnected,
    #[error("only the registry admin may add candidates")]
    NotAuthorized,
}

impl VotingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            VotingError::ProviderUnavailable(_) => ErrorKind::ProviderUnavailable,
            VotingError::AuthorizationDenied(_) => ErrorKind::AuthorizationDenied,
            VotingError::MutationRejected(_) => ErrorKind::MutationRejected,
            VotingError::SubmissionFailed(_) => ErrorKind::SubmissionFailed,
            VotingError::ConfirmationTimeout { .. } => ErrorKind::ConfirmationTimeout,
            VotingError::SyncFailed(_) => ErrorKind::SyncFailed,
            VotingError::MutationInProgress => ErrorKind::MutationInProgress,
            VotingError::IneligibleToVote(_) => ErrorKind::IneligibleToVote,
            VotingError::InvalidCandidateName => ErrorKind::InvalidCandidateName,
            VotingError::NotConnected => ErrorKind::NotConnected,
            VotingError::NotAuthorized => ErrorKind::NotAuthorized,
        }
    }

    pub fn layer(&self) -> ErrorLayer {
        match self.kind() {
            ErrorKind::ProviderUnavailable | ErrorKind::AuthorizationDenied => {
                ErrorLayer::Identity
            }
            ErrorKind::MutationRejected
            | ErrorKind::SubmissionFailed
            | ErrorKind::ConfirmationTimeout
            | ErrorKind::SyncFailed => ErrorLayer::Registry,
            ErrorKind::MutationInProgress
            | ErrorKind::IneligibleToVote
            | ErrorKind::InvalidCandidateName
            | ErrorKind::NotConnected
            | ErrorKind::NotAuthorized => ErrorLayer::Local,
        }
    }

    /// True when nothing was changed and the same action may simply be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::ProviderUnavailable
                | ErrorKind::SubmissionFailed
                | ErrorKind::SyncFailed
                | ErrorKind::MutationInProgress
                | ErrorKind::NotConnected
        )
    }

    pub(crate) fn from_wallet_on_connect(err: WalletError) -> Self {
        match err {
            WalletError::Unavailable(reason) => VotingError::ProviderUnavailable(reason),
            WalletError::Denied(reason) => VotingError::AuthorizationDenied(reason),
            WalletError::UnknownAccount(account) => {
                VotingError::AuthorizationDenied(format!("account {account} is not authorized"))
            }
        }
    }
}
