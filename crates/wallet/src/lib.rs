//! Identity-provider capability consumed by the voting client.
//!
//! The client never talks to a wallet directly: it receives an
//! [`IdentityProvider`] and asks it for accounts and a signing context.

use std::sync::Arc;

use async_trait::async_trait;
use shared::{
    domain::Identity,
    protocol::{RegistryCall, SignedCall},
};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WalletError {
    #[error("identity provider is unavailable: {0}")]
    Unavailable(String),
    #[error("operator denied the request: {0}")]
    Denied(String),
    #[error("account {0} is not managed by this provider")]
    UnknownAccount(Identity),
}

#[async_trait]
pub trait Signer: Send + Sync {
    fn identity(&self) -> &Identity;
    async fn sign(&self, call: RegistryCall) -> Result<SignedCall, WalletError>;
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Prompts for authorization and returns the authorized accounts, active one first.
    async fn request_accounts(&self) -> Result<Vec<Identity>, WalletError>;
    async fn signing_context(&self) -> Result<Arc<dyn Signer>, WalletError>;
}

pub struct MissingIdentityProvider;

#[async_trait]
impl IdentityProvider for MissingIdentityProvider {
    async fn request_accounts(&self) -> Result<Vec<Identity>, WalletError> {
        Err(WalletError::Unavailable("no identity provider installed".into()))
    }

    async fn signing_context(&self) -> Result<Arc<dyn Signer>, WalletError> {
        Err(WalletError::Unavailable("no identity provider installed".into()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalPolicy {
    ApproveAll,
    DenyAll,
}

/// Provider over a fixed set of node-unlocked accounts.
///
/// Signing attaches the active account as `from`; the registry endpoint holds
/// the keys. The active account can be switched at runtime to emulate the
/// operator picking another account in their wallet.
pub struct StaticWallet {
    accounts: RwLock<Vec<Identity>>,
    policy: RwLock<ApprovalPolicy>,
}

impl StaticWallet {
    pub fn new(accounts: Vec<Identity>) -> Self {
        Self {
            accounts: RwLock::new(accounts),
            policy: RwLock::new(ApprovalPolicy::ApproveAll),
        }
    }

    pub fn with_policy(self, policy: ApprovalPolicy) -> Self {
        Self {
            policy: RwLock::new(policy),
            ..self
        }
    }

    pub async fn set_policy(&self, policy: ApprovalPolicy) {
        *self.policy.write().await = policy;
    }

    /// Moves `account` to the front of the account list.
    pub async fn switch_account(&self, account: &Identity) -> Result<(), WalletError> {
        let mut accounts = self.accounts.write().await;
        let Some(position) = accounts.iter().position(|known| known == account) else {
            return Err(WalletError::UnknownAccount(account.clone()));
        };
        let selected = accounts.remove(position);
        info!(account = %selected, "wallet: active account switched");
        accounts.insert(0, selected);
        Ok(())
    }

    async fn active(&self) -> Result<Identity, WalletError> {
        self.accounts
            .read()
            .await
            .first()
            .cloned()
            .ok_or_else(|| WalletError::Unavailable("wallet has no accounts".into()))
    }
}

#[async_trait]
impl IdentityProvider for StaticWallet {
    async fn request_accounts(&self) -> Result<Vec<Identity>, WalletError> {
        if *self.policy.read().await == ApprovalPolicy::DenyAll {
            return Err(WalletError::Denied("account access rejected".into()));
        }
        let accounts = self.accounts.read().await.clone();
        if accounts.is_empty() {
            return Err(WalletError::Unavailable("wallet has no accounts".into()));
        }
        Ok(accounts)
    }

    async fn signing_context(&self) -> Result<Arc<dyn Signer>, WalletError> {
        let identity = self.active().await?;
        let policy = *self.policy.read().await;
        Ok(Arc::new(UnlockedAccountSigner { identity, policy }))
    }
}

struct UnlockedAccountSigner {
    identity: Identity,
    policy: ApprovalPolicy,
}

#[async_trait]
impl Signer for UnlockedAccountSigner {
    fn identity(&self) -> &Identity {
        &self.identity
    }

    async fn sign(&self, call: RegistryCall) -> Result<SignedCall, WalletError> {
        if self.policy == ApprovalPolicy::DenyAll {
            return Err(WalletError::Denied(format!(
                "signature for {} rejected",
                call.method()
            )));
        }
        debug!(account = %self.identity, method = call.method(), "wallet: signed call");
        Ok(SignedCall {
            from: self.identity.clone(),
            call,
        })
    }
}
