use shared::error::ErrorCode;
use wallet::{ApprovalPolicy, StaticWallet};

use super::*;
use crate::{
    memory::MemoryRegistry,
    test_support::{admin, test_config, voter},
};

fn client_for(memory: &MemoryRegistry, wallet: StaticWallet) -> RegistryClient {
    RegistryClient::new(Arc::new(memory.clone()), Arc::new(wallet), &test_config())
}

#[tokio::test]
async fn reads_pass_through_to_backend() {
    let memory = MemoryRegistry::new(admin());
    let client = client_for(&memory, StaticWallet::new(vec![voter()]));

    assert_eq!(client.get_admin().await.expect("admin"), admin());
    assert!(client.get_candidates().await.expect("candidates").is_empty());
    assert!(!client.has_voted(&voter()).await.expect("has voted"));
}

#[tokio::test]
async fn write_signs_as_active_account_and_confirms() {
    let memory = MemoryRegistry::new(admin());
    let client = client_for(&memory, StaticWallet::new(vec![admin()]));

    let handle = client.submit_add_candidate("Alice").await.expect("submit");
    assert_eq!(
        handle.call(),
        &RegistryCall::AddCandidate {
            name: "Alice".into()
        }
    );
    handle.await_confirmation().await.expect("confirmed");

    assert_eq!(memory.candidates_snapshot()[0].name, "Alice");
}

#[tokio::test]
async fn reverted_transaction_surfaces_as_rejection() {
    let memory = MemoryRegistry::new(admin());
    let client = client_for(&memory, StaticWallet::new(vec![voter()]));

    let handle = client.submit_vote(CandidateId(3)).await.expect("submit");
    let err = handle.await_confirmation().await.expect_err("reverted");

    assert_eq!(err, VotingError::MutationRejected("invalid candidate".into()));
}

#[tokio::test]
async fn refused_signature_is_a_submission_failure() {
    let memory = MemoryRegistry::new(admin());
    let client = client_for(
        &memory,
        StaticWallet::new(vec![voter()]).with_policy(ApprovalPolicy::DenyAll),
    );

    let err = client
        .submit_vote(CandidateId(0))
        .await
        .err()
        .expect("signature refused");

    assert!(matches!(err, VotingError::SubmissionFailed(_)));
    assert_eq!(memory.calls().send_transaction, 0);
}

#[tokio::test(start_paused = true)]
async fn unconfirmed_transaction_times_out() {
    let memory = MemoryRegistry::new(admin());
    memory.hold_receipts(true);
    let client = client_for(&memory, StaticWallet::new(vec![admin()]));

    let handle = client.submit_add_candidate("Alice").await.expect("submit");
    let err = handle.await_confirmation().await.expect_err("timeout");

    assert_eq!(
        err,
        VotingError::ConfirmationTimeout {
            tx_hash: handle.tx_hash().clone()
        }
    );
}

#[test]
fn submission_errors_split_into_rejection_and_failure() {
    assert_eq!(
        classify_submission_error(RegistryError::Api(ApiError::new(
            ErrorCode::Validation,
            "already voted"
        ))),
        VotingError::MutationRejected("already voted".into())
    );
    assert!(matches!(
        classify_submission_error(RegistryError::Api(ApiError::new(
            ErrorCode::Internal,
            "boom"
        ))),
        VotingError::SubmissionFailed(_)
    ));
    assert!(matches!(
        classify_submission_error(RegistryError::Transport("refused".into())),
        VotingError::SubmissionFailed(_)
    ));
}
