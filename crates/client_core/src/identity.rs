use std::sync::Arc;

use shared::domain::Identity;
use tokio::sync::watch;
use tracing::info;
use wallet::IdentityProvider;

use crate::error::VotingError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindOutcome {
    /// No identity was bound before.
    Bound(Identity),
    /// The provider now reports a different active account.
    Rebound { previous: Identity, current: Identity },
    /// Re-authorization confirmed the identity already bound.
    Unchanged(Identity),
}

impl BindOutcome {
    pub fn identity(&self) -> &Identity {
        match self {
            BindOutcome::Bound(identity)
            | BindOutcome::Unchanged(identity)
            | BindOutcome::Rebound {
                current: identity, ..
            } => identity,
        }
    }
}

/// Holds the operator identity authorized by the identity provider.
pub struct IdentityBinding {
    provider: Arc<dyn IdentityProvider>,
    current: watch::Sender<Option<Identity>>,
}

impl IdentityBinding {
    pub fn new(provider: Arc<dyn IdentityProvider>) -> Self {
        let (current, _) = watch::channel(None);
        Self { provider, current }
    }

    pub fn current(&self) -> Option<Identity> {
        self.current.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Identity>> {
        self.current.subscribe()
    }

    /// Requests authorization and binds the first authorized account.
    pub async fn connect(&self) -> Result<BindOutcome, VotingError> {
        let accounts = self
            .provider
            .request_accounts()
            .await
            .map_err(VotingError::from_wallet_on_connect)?;
        let Some(identity) = accounts.into_iter().next().filter(|first| !first.is_empty()) else {
            return Err(VotingError::AuthorizationDenied(
                "provider authorized no accounts".into(),
            ));
        };

        let previous = self.current.send_replace(Some(identity.clone()));
        let outcome = match previous {
            None => BindOutcome::Bound(identity),
            Some(previous) if previous == identity => BindOutcome::Unchanged(identity),
            Some(previous) => BindOutcome::Rebound {
                previous,
                current: identity,
            },
        };
        info!(identity = %outcome.identity(), ?outcome, "identity: bound");
        Ok(outcome)
    }

    pub fn disconnect(&self) -> Option<Identity> {
        let previous = self.current.send_replace(None);
        if let Some(identity) = &previous {
            info!(%identity, "identity: unbound");
        }
        previous
    }
}

#[cfg(test)]
#[path = "tests/identity_tests.rs"]
mod tests;
