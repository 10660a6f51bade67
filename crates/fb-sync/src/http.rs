use crate::error::RemoteError;
use crate::payload::{WirePayload, response_reason};
use crate::remote::RemoteService;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::time::Duration;

const EVENTS_PATH: &str = "/api/events";
const PING_PATH: &str = "/api/system/ping";

/// JSON-over-HTTP client for the remote event service.
pub struct HttpRemote {
    client: reqwest::Client,
    base_url: String,
    credentials: Option<(String, String)>,
}

impl HttpRemote {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(transport)?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials: None,
        })
    }

    pub fn with_basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.credentials {
            Some((username, password)) => request.basic_auth(username, Some(password)),
            None => request,
        }
    }
}

#[async_trait]
impl RemoteService for HttpRemote {
    async fn submit(&self, payload: &WirePayload) -> Result<Value, RemoteError> {
        let body = json!({ "events": [payload] });
        let response = self
            .authorize(self.client.post(self.url(EVENTS_PATH)))
            .json(&body)
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        let text = response.text().await.map_err(transport)?;
        let parsed = serde_json::from_str::<Value>(&text).ok();

        if !status.is_success() {
            let reason = match parsed.as_ref().and_then(response_reason) {
                Some(reason) => format!("HTTP {status}: {reason}"),
                None => format!("HTTP {status}"),
            };
            tracing::debug!(event_id = %payload.id, %status, "remote rejected submission");
            return Err(RemoteError::Rejected { reason });
        }

        parsed.ok_or_else(|| RemoteError::Malformed {
            message: format!("expected a JSON body, got {} bytes of text", text.len()),
        })
    }

    async fn ping(&self) -> bool {
        let request = self
            .authorize(self.client.get(self.url(PING_PATH)))
            .header(reqwest::header::ACCEPT, "text/plain");
        match request.send().await {
            Ok(response) => response.status().is_success(),
            Err(err) => {
                tracing::debug!(error = %err, "remote ping failed");
                false
            }
        }
    }
}

fn transport(err: reqwest::Error) -> RemoteError {
    RemoteError::Transport {
        message: err.to_string(),
    }
}
