//! AI gateway: OpenAI-compatible chat completions with bounded retries

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::prompt::Prompt;
use crate::config::{BackoffKind, GatewayConfig};
use crate::domain::ModelEndpoint;
use crate::error::GatewayError;

/// Sends a prompt to a model endpoint and returns the raw completion text
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AiGateway: Send + Sync {
    async fn complete(
        &self,
        endpoint: &ModelEndpoint,
        prompt: &Prompt,
        timeout: Duration,
    ) -> Result<String, GatewayError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// Normalize a base URL so it ends in exactly one `/v1` segment
pub fn normalize_base_url(url: &str) -> String {
    let base = url.trim().trim_end_matches('/');
    if base.ends_with("/v1") {
        base.to_string()
    } else if let Some(idx) = base.find("/v1") {
        format!("{}/v1", &base[..idx])
    } else {
        format!("{}/v1", base)
    }
}

/// Client for any endpoint speaking the OpenAI chat completions protocol
pub struct OpenAiCompatibleGateway {
    http: Client,
    temperature: f32,
    max_tokens: u32,
}

impl OpenAiCompatibleGateway {
    pub fn new(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let http = Client::builder()
            .build()
            .map_err(|e| GatewayError::Transport(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            http,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    fn classify(err: reqwest::Error, started: Instant) -> GatewayError {
        if err.is_timeout() {
            GatewayError::Timeout {
                elapsed_ms: started.elapsed().as_millis() as u64,
            }
        } else if err.is_decode() {
            GatewayError::Malformed(err.to_string())
        } else {
            GatewayError::Transport(err.to_string())
        }
    }
}

#[async_trait]
impl AiGateway for OpenAiCompatibleGateway {
    async fn complete(
        &self,
        endpoint: &ModelEndpoint,
        prompt: &Prompt,
        timeout: Duration,
    ) -> Result<String, GatewayError> {
        let url = format!("{}/chat/completions", normalize_base_url(&endpoint.base_url));
        let request = ChatRequest {
            model: &endpoint.model_name,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: prompt.system.clone(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: prompt.user.clone(),
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        debug!(model = %endpoint.model_name, "Sending chat completion request");
        let started = Instant::now();

        let response = self
            .http
            .post(&url)
            .bearer_auth(endpoint.api_key.as_str())
            .timeout(timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| Self::classify(e, started))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Chat completion API error: {} - {}", status, body);
            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    GatewayError::Auth(format!("{} - {}", status, body))
                }
                StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
                    GatewayError::Timeout {
                        elapsed_ms: started.elapsed().as_millis() as u64,
                    }
                }
                _ => GatewayError::Transport(format!("{} - {}", status, body)),
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Malformed(format!("Failed to parse completion: {}", e)))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| GatewayError::Malformed("completion has no choices".to_string()))?;

        debug!("Completion received: {} chars", content.len());
        Ok(content)
    }
}

/// Attempt cap and backoff between gateway calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u8,
    pub backoff: BackoffKind,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Sleeping stops once another delay would exceed this budget
    pub max_total_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&GatewayConfig::default())
    }
}

impl From<&GatewayConfig> for RetryPolicy {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff: config.backoff,
            base_delay: Duration::from_millis(config.backoff_base_ms),
            max_delay: Duration::from_millis(config.backoff_cap_ms),
            max_total_wait: Duration::from_secs(config.max_total_wait_secs),
        }
    }
}

impl RetryPolicy {
    /// No sleeping between attempts
    pub fn immediate(max_attempts: u8) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: BackoffKind::Fixed,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            max_total_wait: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt` (1-based count of failures so far)
    pub fn delay(&self, attempt: u8) -> Duration {
        let delay = match self.backoff {
            BackoffKind::Fixed => self.base_delay,
            BackoffKind::Exponential => {
                let factor = 1u32 << u32::from(attempt.saturating_sub(1)).min(16);
                self.base_delay.saturating_mul(factor)
            }
        };
        delay.min(self.max_delay)
    }
}

/// Call the gateway until it succeeds or the policy gives up.
///
/// Returns the completion and the number of attempts it took.
pub async fn complete_with_retry(
    gateway: &dyn AiGateway,
    endpoint: &ModelEndpoint,
    prompt: &Prompt,
    timeout: Duration,
    policy: &RetryPolicy,
) -> Result<(String, u8), GatewayError> {
    let mut attempts: u8 = 0;
    let mut waited = Duration::ZERO;

    loop {
        attempts += 1;
        match gateway.complete(endpoint, prompt, timeout).await {
            Ok(text) => return Ok((text, attempts)),
            Err(e) => {
                warn!(
                    model = %endpoint.model_name,
                    attempt = attempts,
                    kind = e.kind(),
                    "Gateway attempt failed: {}",
                    e
                );

                let delay = policy.delay(attempts);
                let budget_left = waited + delay <= policy.max_total_wait;
                if attempts >= policy.max_attempts || !budget_left {
                    return Err(GatewayError::RetriesExhausted {
                        attempts,
                        last: Box::new(e),
                    });
                }

                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                    waited += delay;
                }
            }
        }
    }
}
