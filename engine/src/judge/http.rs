use super::{
    extract_json, Decider, Decision, DecisionRequest, Judge, JudgmentError, JudgmentRequest,
    Verdict,
};
use crate::config::JudgeConfig;
use async_trait::async_trait;
use sdk::errors::WorkflowError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

/// Judge and decider backed by an HTTP endpoint
///
/// Requests are POSTed as JSON to `<endpoint>/evaluate` and
/// `<endpoint>/decide`. The response body may be the JSON object itself or
/// model text with the object embedded in it.
pub struct HttpJudge {
    endpoint: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpJudge {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, WorkflowError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| WorkflowError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key,
            client,
        })
    }

    /// Build from config; `None` when no endpoint is configured
    pub fn from_config(config: &JudgeConfig) -> Result<Option<Self>, WorkflowError> {
        match config.endpoint.as_deref() {
            Some(endpoint) if !endpoint.trim().is_empty() => Ok(Some(Self::new(
                endpoint.trim(),
                config.api_key(),
                Duration::from_secs(config.timeout_secs),
            )?)),
            _ => Ok(None),
        }
    }

    async fn post<B, R>(&self, route: &str, body: &B) -> Result<R, JudgmentError>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let url = format!("{}/{}", self.endpoint, route);

        let mut request = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(body);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        let response = request
            .send()
            .await
            .map_err(|e| JudgmentError::Network(e.to_string()))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        if !status.is_success() {
            debug!(status = status.as_u16(), url = %url, "Judgment endpoint error");

            return Err(match status.as_u16() {
                429 => JudgmentError::RateLimited(text),
                401 | 403 => JudgmentError::Unauthorized(text),
                code => JudgmentError::Upstream {
                    status: code,
                    message: text,
                },
            });
        }

        let json = extract_json(&text).ok_or_else(|| {
            JudgmentError::InvalidResponse("No JSON object in response".to_string())
        })?;

        serde_json::from_str(&json).map_err(|e| JudgmentError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl Judge for HttpJudge {
    async fn evaluate(&self, request: &JudgmentRequest) -> Result<Verdict, JudgmentError> {
        self.post("evaluate", request).await
    }
}

#[async_trait]
impl Decider for HttpJudge {
    async fn decide(&self, request: &DecisionRequest) -> Result<Decision, JudgmentError> {
        self.post("decide", request).await
    }
}
