//! HTTP response collaborator: POSTs the request as JSON, reads back a verdict.

use super::{DispatchError, ResponseDecision, ResponseDispatcher, ResponseRequest};

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

pub struct HttpResponder {
    url: String,
    http: Client,
}

impl HttpResponder {
    pub fn new(url: String, timeout: Duration) -> Result<Self, DispatchError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DispatchError::Transport(e.to_string()))?;
        Ok(Self { url, http })
    }
}

#[async_trait]
impl ResponseDispatcher for HttpResponder {
    async fn respond(&self, request: &ResponseRequest) -> Result<ResponseDecision, DispatchError> {
        debug!(url = %self.url, data_index = request.data_index, "requesting response");

        let resp = self
            .http
            .post(&self.url)
            .json(request)
            .send()
            .await
            .map_err(|e| DispatchError::Transport(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(DispatchError::Status(resp.status().as_u16()));
        }

        let body = resp
            .text()
            .await
            .map_err(|e| DispatchError::Transport(e.to_string()))?;
        parse_decision(&body)
    }
}

fn parse_decision(body: &str) -> Result<ResponseDecision, DispatchError> {
    serde_json::from_str(body).map_err(|e| DispatchError::Body(e.to_string()))
}
