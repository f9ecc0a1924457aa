use std::time::Duration;

use shared::{
    domain::{Candidate, CandidateId, Identity},
    protocol::{RegistryCall, SignedCall},
};
use tokio::time::{sleep, timeout};

use crate::{
    memory::MemoryRegistry,
    registry::RegistryBackend,
    test_support::{admin, other_voter, session_for, voter, wait_for_view},
    ClientEvent,
};

async fn submit(memory: &MemoryRegistry, from: Identity, call: RegistryCall) {
    memory
        .send_transaction(SignedCall { from, call })
        .await
        .expect("submit");
}

async fn wait_for_subscription(memory: &MemoryRegistry, expected: usize) {
    timeout(Duration::from_secs(5), async {
        while memory.calls().subscribe < expected {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("feed subscribed");
}

#[tokio::test]
async fn external_candidate_addition_resyncs_roster() {
    let memory = MemoryRegistry::new(admin());
    let (session, _) = session_for(&memory, vec![voter()]);
    session.connect().await.expect("connect");
    wait_for_subscription(&memory, 1).await;
    let mut view = session.view();

    submit(
        &memory,
        admin(),
        RegistryCall::AddCandidate {
            name: "Alice".into(),
        },
    )
    .await;

    let synced = wait_for_view(&mut view, |view| !view.candidates.is_empty()).await;
    assert_eq!(synced.candidates, vec![Candidate::new(0, "Alice", 0)]);
}

#[tokio::test]
async fn own_vote_notification_marks_voted() {
    let memory = MemoryRegistry::new(admin());
    submit(
        &memory,
        admin(),
        RegistryCall::AddCandidate {
            name: "Alice".into(),
        },
    )
    .await;
    let (session, _) = session_for(&memory, vec![voter()]);
    session.connect().await.expect("connect");
    wait_for_subscription(&memory, 1).await;
    let mut view = session.view();

    // The vote lands through another client signed by the same account.
    submit(
        &memory,
        voter(),
        RegistryCall::Vote {
            candidate_id: CandidateId(0),
        },
    )
    .await;

    let synced = wait_for_view(&mut view, |view| {
        view.has_voted && view.candidates.first().is_some_and(|alice| alice.vote_count == 1)
    })
    .await;
    assert!(!synced.can_vote());
}

#[tokio::test]
async fn other_voters_do_not_change_own_eligibility() {
    let memory = MemoryRegistry::new(admin());
    submit(
        &memory,
        admin(),
        RegistryCall::AddCandidate {
            name: "Alice".into(),
        },
    )
    .await;
    let (session, _) = session_for(&memory, vec![voter()]);
    session.connect().await.expect("connect");
    wait_for_subscription(&memory, 1).await;
    let mut view = session.view();

    submit(
        &memory,
        other_voter(),
        RegistryCall::Vote {
            candidate_id: CandidateId(0),
        },
    )
    .await;

    let synced = wait_for_view(&mut view, |view| {
        view.candidates
            .first()
            .is_some_and(|alice| alice.vote_count == 1)
    })
    .await;
    assert!(!synced.has_voted);
    assert!(synced.can_vote());
}

#[tokio::test]
async fn duplicate_delivery_leaves_same_view() {
    let memory = MemoryRegistry::new(admin());
    let (session, _) = session_for(&memory, vec![voter()]);
    session.connect().await.expect("connect");
    wait_for_subscription(&memory, 1).await;
    let mut events = session.subscribe_events();
    let mut view = session.view();

    submit(
        &memory,
        admin(),
        RegistryCall::AddCandidate {
            name: "Alice".into(),
        },
    )
    .await;
    let once = wait_for_view(&mut view, |view| !view.candidates.is_empty()).await;

    memory.redeliver_last_event();
    timeout(Duration::from_secs(5), async {
        let mut notifications = 0;
        while notifications < 2 {
            if let Ok(ClientEvent::Notification(_)) = events.recv().await {
                notifications += 1;
            }
        }
    })
    .await
    .expect("both deliveries observed");
    let twice = wait_for_view(&mut view, |view| view.last_sync_token > once.last_sync_token).await;

    assert_eq!(twice.candidates, once.candidates);
    assert_eq!(twice.role, once.role);
    assert_eq!(twice.has_voted, once.has_voted);
}

#[tokio::test]
async fn dropped_feed_stops_handling_notifications() {
    let memory = MemoryRegistry::new(admin());
    let (session, _) = session_for(&memory, vec![voter()]);
    session.connect().await.expect("connect");
    wait_for_subscription(&memory, 1).await;

    session.disconnect().await;
    let reads = memory.calls().candidates;
    submit(
        &memory,
        admin(),
        RegistryCall::AddCandidate {
            name: "Alice".into(),
        },
    )
    .await;
    sleep(Duration::from_millis(50)).await;

    assert_eq!(memory.calls().candidates, reads);
    assert!(session.snapshot().candidates.is_empty());
}

#[tokio::test]
async fn failed_feed_sync_is_reported_as_warning() {
    let memory = MemoryRegistry::new(admin());
    let (session, _) = session_for(&memory, vec![voter()]);
    session.connect().await.expect("connect");
    wait_for_subscription(&memory, 1).await;
    let mut events = session.subscribe_events();

    memory.fail_next_reads(1);
    submit(
        &memory,
        admin(),
        RegistryCall::AddCandidate {
            name: "Alice".into(),
        },
    )
    .await;

    let warning = timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(ClientEvent::SyncWarning(message)) = events.recv().await {
                return message;
            }
        }
    })
    .await
    .expect("warning emitted");
    assert!(warning.contains("injected"));
}
