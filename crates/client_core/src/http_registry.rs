//! Registry backend speaking JSON over HTTP to a registry gateway, with
//! notifications delivered over a websocket.

use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use futures::{future, StreamExt};
use reqwest::{Client, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use shared::{
    domain::{Candidate, Identity},
    error::{ApiError, ErrorCode},
    protocol::{
        AdminResponse, CandidatesResponse, HasVotedResponse, Receipt, ReceiptStatus,
        RegistryEvent, SendTransactionResponse, SignedCall, TxHash,
    },
};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info};

use crate::registry::{EventStream, RegistryBackend, RegistryError};

pub struct HttpRegistry {
    http: Client,
    base_url: String,
    base: Url,
}

impl HttpRegistry {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> anyhow::Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(anyhow!("registry url must start with http:// or https://"));
        }
        let base = Url::parse(&base_url)?;
        let http = Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            http,
            base_url,
            base,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Appends `segments` to the base URL, percent-encoding each one.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, RegistryError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| {
                RegistryError::Transport(format!("registry url cannot carry a path: {}", self.base))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn events_url(&self) -> Result<String, RegistryError> {
        let ws_base = if self.base_url.starts_with("https://") {
            self.base_url.replacen("https://", "wss://", 1)
        } else if self.base_url.starts_with("http://") {
            self.base_url.replacen("http://", "ws://", 1)
        } else {
            return Err(RegistryError::Subscription(format!(
                "unsupported registry url: {}",
                self.base_url
            )));
        };
        Ok(format!("{ws_base}/events"))
    }

    async fn get_json<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T, RegistryError> {
        let res = self
            .http
            .get(self.endpoint(segments)?)
            .send()
            .await
            .map_err(transport_error)?;
        decode_response(res).await
    }
}

fn transport_error(err: reqwest::Error) -> RegistryError {
    RegistryError::Transport(err.to_string())
}

async fn decode_response<T: DeserializeOwned>(res: Response) -> Result<T, RegistryError> {
    let status = res.status();
    if status.is_success() {
        return res
            .json::<T>()
            .await
            .map_err(|err| RegistryError::Decode(err.to_string()));
    }

    let body = res.text().await.unwrap_or_default();
    if let Ok(api) = serde_json::from_str::<ApiError>(&body) {
        return Err(RegistryError::Api(api));
    }
    if status.is_server_error() {
        return Err(RegistryError::Transport(format!("{status}: {body}")));
    }
    Err(RegistryError::Api(ApiError::new(
        error_code_for_status(status),
        if body.is_empty() {
            status.to_string()
        } else {
            body
        },
    )))
}

fn error_code_for_status(status: StatusCode) -> ErrorCode {
    match status {
        StatusCode::UNAUTHORIZED => ErrorCode::Unauthorized,
        StatusCode::FORBIDDEN => ErrorCode::Forbidden,
        StatusCode::NOT_FOUND => ErrorCode::NotFound,
        StatusCode::TOO_MANY_REQUESTS => ErrorCode::RateLimited,
        status if status.is_client_error() => ErrorCode::Validation,
        _ => ErrorCode::Internal,
    }
}

#[async_trait]
impl RegistryBackend for HttpRegistry {
    async fn admin(&self) -> Result<Identity, RegistryError> {
        let body: AdminResponse = self.get_json(&["admin"]).await?;
        Ok(body.admin)
    }

    async fn candidates(&self) -> Result<Vec<Candidate>, RegistryError> {
        self.get_json::<CandidatesResponse>(&["candidates"]).await
    }

    async fn has_user_voted(&self, voter: &Identity) -> Result<bool, RegistryError> {
        let body: HasVotedResponse = self
            .get_json(&["voters", voter.as_str(), "voted"])
            .await?;
        Ok(body.has_voted)
    }

    async fn send_transaction(&self, signed: SignedCall) -> Result<TxHash, RegistryError> {
        let res = self
            .http
            .post(self.endpoint(&["transactions"])?)
            .json(&signed)
            .send()
            .await
            .map_err(transport_error)?;
        let body: SendTransactionResponse = decode_response(res).await?;
        Ok(body.tx_hash)
    }

    async fn transaction_receipt(
        &self,
        tx_hash: &TxHash,
    ) -> Result<Option<Receipt>, RegistryError> {
        let status: ReceiptStatus = self
            .get_json(&["transactions", tx_hash.0.as_str(), "receipt"])
            .await?;
        Ok(status.into_receipt())
    }

    async fn subscribe(&self) -> Result<EventStream, RegistryError> {
        let ws_url = self.events_url()?;
        let (ws_stream, _) = connect_async(&ws_url)
            .await
            .map_err(|err| RegistryError::Subscription(format!("{ws_url}: {err}")))?;
        info!(url = %ws_url, "registry: event subscription opened");
        let (_, ws_reader) = ws_stream.split();

        let events = ws_reader
            .take_while(|msg| future::ready(!matches!(msg, Ok(Message::Close(_)))))
            .filter_map(|msg| async move {
                match msg {
                    Ok(Message::Text(text)) => Some(
                        serde_json::from_str::<RegistryEvent>(&text).map_err(|err| {
                            RegistryError::Decode(format!("invalid registry event: {err}"))
                        }),
                    ),
                    Ok(other) => {
                        debug!(?other, "registry: ignoring non-text websocket frame");
                        None
                    }
                    Err(err) => Some(Err(RegistryError::Subscription(err.to_string()))),
                }
            });
        Ok(Box::pin(events))
    }
}

#[cfg(test)]
#[path = "tests/http_registry_tests.rs"]
mod tests;
