//! Fixtures shared by the unit tests.

use std::{sync::Arc, time::Duration};

use shared::domain::Identity;
use tokio::{sync::watch, time::timeout};
use wallet::StaticWallet;

use crate::{ClientConfig, MemoryRegistry, ViewState, VotingSession};

pub(crate) const ADMIN: &str = "0xA11CE00000000000000000000000000000000001";
pub(crate) const VOTER: &str = "0xB0B0000000000000000000000000000000000002";
pub(crate) const OTHER_VOTER: &str = "0xCA401000000000000000000000000000000000003";

pub(crate) fn admin() -> Identity {
    Identity::new(ADMIN)
}

pub(crate) fn voter() -> Identity {
    Identity::new(VOTER)
}

pub(crate) fn other_voter() -> Identity {
    Identity::new(OTHER_VOTER)
}

pub(crate) fn test_config() -> ClientConfig {
    ClientConfig {
        confirmation_timeout: Duration::from_secs(5),
        receipt_poll_interval: Duration::from_millis(10),
        sync_backoff_base: Duration::from_millis(10),
        sync_backoff_max: Duration::from_millis(50),
        ..ClientConfig::default()
    }
}

pub(crate) fn session_for(
    registry: &MemoryRegistry,
    accounts: Vec<Identity>,
) -> (VotingSession, Arc<StaticWallet>) {
    let wallet = Arc::new(StaticWallet::new(accounts));
    let session = VotingSession::new(
        Arc::new(registry.clone()),
        wallet.clone(),
        test_config(),
    );
    (session, wallet)
}

pub(crate) async fn wait_for_view(
    view: &mut watch::Receiver<ViewState>,
    predicate: impl FnMut(&ViewState) -> bool,
) -> ViewState {
    timeout(Duration::from_secs(5), view.wait_for(predicate))
        .await
        .expect("view condition not reached in time")
        .expect("view store dropped")
        .clone()
}
