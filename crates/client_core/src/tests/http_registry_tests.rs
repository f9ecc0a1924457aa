use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response as AxumResponse},
    routing::{get, post},
    Json, Router,
};
use shared::{
    domain::CandidateId,
    protocol::RegistryCall,
};
use tokio::{net::TcpListener, sync::Mutex};

use super::*;
use crate::test_support::{admin, voter};

#[derive(Clone, Default)]
struct GatewayState {
    submitted: Arc<Mutex<Vec<SignedCall>>>,
    voters_queried: Arc<Mutex<Vec<String>>>,
}

async fn gateway_admin() -> Json<AdminResponse> {
    Json(AdminResponse { admin: admin() })
}

async fn gateway_candidates() -> Json<CandidatesResponse> {
    Json(vec![
        Candidate::new(0, "Alice", 2),
        Candidate::new(1, "Bob", 0),
    ])
}

async fn gateway_has_voted(
    State(state): State<GatewayState>,
    Path(address): Path<String>,
) -> Json<HasVotedResponse> {
    state.voters_queried.lock().await.push(address.clone());
    Json(HasVotedResponse {
        has_voted: Identity::new(address) == voter(),
    })
}

async fn gateway_send(
    State(state): State<GatewayState>,
    Json(signed): Json<SignedCall>,
) -> AxumResponse {
    let rejected = matches!(
        signed.call,
        RegistryCall::Vote {
            candidate_id: CandidateId(99)
        }
    );
    state.submitted.lock().await.push(signed);
    if rejected {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ApiError::new(ErrorCode::Validation, "invalid candidate")),
        )
            .into_response();
    }
    Json(SendTransactionResponse {
        tx_hash: TxHash("0x01".into()),
    })
    .into_response()
}

async fn gateway_receipt(Path(tx_hash): Path<String>) -> Json<ReceiptStatus> {
    Json(match tx_hash.as_str() {
        "0xpending" => ReceiptStatus::Pending,
        "0xbad" => ReceiptStatus::Reverted {
            reason: "already voted".into(),
        },
        _ => ReceiptStatus::Confirmed,
    })
}

async fn gateway_events(ws: WebSocketUpgrade) -> AxumResponse {
    ws.on_upgrade(|mut socket| async move {
        let events = [
            RegistryEvent::CandidateAdded {
                candidate_id: CandidateId(0),
                name: "Alice".into(),
            },
            RegistryEvent::Voted {
                voter: voter(),
                candidate_id: CandidateId(0),
            },
        ];
        for event in events {
            let text = serde_json::to_string(&event).expect("encode event");
            if socket.send(WsMessage::Text(text)).await.is_err() {
                return;
            }
        }
        let _ = socket.send(WsMessage::Text("not json".into())).await;
        let _ = socket.send(WsMessage::Close(None)).await;
    })
}

async fn gateway_unavailable() -> AxumResponse {
    (StatusCode::BAD_GATEWAY, "upstream node down").into_response()
}

async fn spawn_gateway() -> anyhow::Result<(String, GatewayState)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let state = GatewayState::default();
    let app = Router::new()
        .route("/admin", get(gateway_admin))
        .route("/candidates", get(gateway_candidates))
        .route("/voters/:address/voted", get(gateway_has_voted))
        .route("/transactions", post(gateway_send))
        .route("/transactions/:tx_hash/receipt", get(gateway_receipt))
        .route("/events", get(gateway_events))
        .route("/down/admin", get(gateway_unavailable))
        .with_state(state.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok((format!("http://{addr}"), state))
}

fn registry(base_url: &str) -> HttpRegistry {
    HttpRegistry::new(base_url, Duration::from_secs(5)).expect("registry")
}

#[test]
fn rejects_non_http_urls() {
    assert!(HttpRegistry::new("ftp://registry", Duration::from_secs(1)).is_err());
    let registry = registry("https://registry.example/api/");
    assert_eq!(registry.base_url(), "https://registry.example/api");
    assert_eq!(
        registry.events_url().expect("events url"),
        "wss://registry.example/api/events"
    );
}

#[tokio::test]
async fn reads_decode_gateway_responses() -> anyhow::Result<()> {
    let (base_url, _) = spawn_gateway().await?;
    let registry = registry(&base_url);

    assert_eq!(registry.admin().await?, admin());
    assert_eq!(
        registry.candidates().await?,
        vec![Candidate::new(0, "Alice", 2), Candidate::new(1, "Bob", 0)]
    );
    assert!(registry.has_user_voted(&voter()).await?);
    assert!(!registry.has_user_voted(&admin()).await?);
    Ok(())
}

#[tokio::test]
async fn send_transaction_posts_signed_call() -> anyhow::Result<()> {
    let (base_url, state) = spawn_gateway().await?;
    let registry = registry(&base_url);
    let signed = SignedCall {
        from: voter(),
        call: RegistryCall::Vote {
            candidate_id: CandidateId(1),
        },
    };

    let tx_hash = registry.send_transaction(signed.clone()).await?;

    assert_eq!(tx_hash, TxHash("0x01".into()));
    assert_eq!(state.submitted.lock().await.as_slice(), &[signed]);
    Ok(())
}

#[tokio::test]
async fn validation_error_body_becomes_api_error() -> anyhow::Result<()> {
    let (base_url, _) = spawn_gateway().await?;
    let registry = registry(&base_url);

    let err = registry
        .send_transaction(SignedCall {
            from: voter(),
            call: RegistryCall::Vote {
                candidate_id: CandidateId(99),
            },
        })
        .await
        .expect_err("rejected");

    match err {
        RegistryError::Api(api) => {
            assert_eq!(api.code, ErrorCode::Validation);
            assert_eq!(api.message, "invalid candidate");
        }
        other => panic!("unexpected error: {other}"),
    }
    Ok(())
}

#[tokio::test]
async fn plain_server_error_is_transport_failure() -> anyhow::Result<()> {
    let (base_url, _) = spawn_gateway().await?;
    let registry = registry(&format!("{base_url}/down"));

    assert!(matches!(
        registry.admin().await,
        Err(RegistryError::Transport(_))
    ));
    Ok(())
}

#[tokio::test]
async fn unreachable_gateway_is_transport_failure() {
    let registry = registry("http://127.0.0.1:9");
    assert!(matches!(
        registry.candidates().await,
        Err(RegistryError::Transport(_))
    ));
}

#[tokio::test]
async fn receipts_map_pending_confirmed_and_reverted() -> anyhow::Result<()> {
    let (base_url, _) = spawn_gateway().await?;
    let registry = registry(&base_url);

    assert_eq!(
        registry
            .transaction_receipt(&TxHash("0xpending".into()))
            .await?,
        None
    );
    assert_eq!(
        registry.transaction_receipt(&TxHash("0x01".into())).await?,
        Some(Receipt::Confirmed)
    );
    assert_eq!(
        registry.transaction_receipt(&TxHash("0xbad".into())).await?,
        Some(Receipt::Reverted {
            reason: "already voted".into()
        })
    );
    Ok(())
}

#[tokio::test]
async fn subscribe_streams_events_until_close() -> anyhow::Result<()> {
    let (base_url, _) = spawn_gateway().await?;
    let registry = registry(&base_url);

    let items = registry.subscribe().await?.collect::<Vec<_>>().await;

    assert_eq!(items.len(), 3);
    assert_eq!(
        items[0].as_ref().expect("first event"),
        &RegistryEvent::CandidateAdded {
            candidate_id: CandidateId(0),
            name: "Alice".into()
        }
    );
    assert_eq!(
        items[1].as_ref().expect("second event"),
        &RegistryEvent::Voted {
            voter: voter(),
            candidate_id: CandidateId(0)
        }
    );
    assert!(matches!(items[2], Err(RegistryError::Decode(_))));
    Ok(())
}

#[test]
fn path_segments_are_percent_encoded() {
    let registry = registry("https://registry.example/api/");

    let url = registry
        .endpoint(&["voters", "0xab/cd?x#y", "voted"])
        .expect("endpoint");

    assert_eq!(
        url.as_str(),
        "https://registry.example/api/voters/0xab%2Fcd%3Fx%23y/voted"
    );
}

#[tokio::test]
async fn identity_with_reserved_characters_reaches_voter_route() -> anyhow::Result<()> {
    let (base_url, state) = spawn_gateway().await?;
    let registry = registry(&base_url);

    let has_voted = registry.has_user_voted(&Identity::new("0xab/cd?x#y")).await?;

    assert!(!has_voted);
    assert_eq!(
        state.voters_queried.lock().await.as_slice(),
        ["0xab/cd?x#y".to_string()]
    );
    Ok(())
}
