use async_trait::async_trait;
use reqwest::Client;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::types::{
    Completion, CompletionRequest, CreatePipeRequest, CreatePipeResponse, Message, PipeRequest,
    PipeResponse, PipeStatus, TokenUsage,
};
use super::LlmProvider;
use crate::config::{LangbaseConfig, PipeConfig, RequestConfig};
use crate::error::{LangbaseError, LangbaseResult};
use crate::prompts::{ANALYSIS_PIPE_PROMPT, JUDGE_SYSTEM_PROMPT};

/// Client for interacting with Langbase Pipes API
#[derive(Clone)]
pub struct LangbaseClient {
    client: Client,
    base_url: String,
    api_key: String,
    request_config: RequestConfig,
}

impl LangbaseClient {
    /// Create a new Langbase client
    pub fn new(config: &LangbaseConfig, request_config: RequestConfig) -> LangbaseResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(request_config.timeout_ms))
            .build()
            .map_err(LangbaseError::Http)?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            request_config,
        })
    }

    /// Call a Langbase pipe with the given request
    pub async fn call_pipe(&self, request: PipeRequest) -> LangbaseResult<PipeResponse> {
        let url = format!("{}/v1/pipes/run", self.base_url);
        let pipe_name = request.name.clone();

        let mut last_error = None;
        let mut retries = 0;

        while retries <= self.request_config.max_retries {
            if retries > 0 {
                let delay_ms = backoff_delay_ms(self.request_config.retry_delay_ms, retries);
                let delay = Duration::from_millis(delay_ms);
                warn!(
                    pipe = %pipe_name,
                    retry = retries,
                    delay_ms = delay.as_millis(),
                    "Retrying Langbase request"
                );
                tokio::time::sleep(delay).await;
            }

            let start = Instant::now();

            match self.execute_request(&url, &request).await {
                Ok(response) => {
                    info!(
                        pipe = %pipe_name,
                        model = ?request.model,
                        latency_ms = start.elapsed().as_millis(),
                        "Langbase pipe call succeeded"
                    );
                    return Ok(response);
                }
                Err(e) => {
                    error!(
                        pipe = %pipe_name,
                        error = %e,
                        latency_ms = start.elapsed().as_millis(),
                        retry = retries,
                        "Langbase pipe call failed"
                    );
                    let retryable = is_retryable(&e);
                    last_error = Some(e);
                    retries += 1;
                    if !retryable {
                        break;
                    }
                }
            }
        }

        Err(LangbaseError::Unavailable {
            message: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "Unknown error".to_string()),
            retries: retries.saturating_sub(1),
        })
    }

    /// Execute a single request (internal)
    async fn execute_request(
        &self,
        url: &str,
        request: &PipeRequest,
    ) -> LangbaseResult<PipeResponse> {
        debug!(
            pipe = %request.name,
            messages = request.messages.len(),
            "Calling Langbase pipe"
        );

        let response = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LangbaseError::Timeout {
                        timeout_ms: self.request_config.timeout_ms,
                    }
                } else {
                    LangbaseError::Http(e)
                }
            })?;

        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(LangbaseError::Api {
                status: status.as_u16(),
                message: error_body,
            });
        }

        let pipe_response: PipeResponse =
            response
                .json()
                .await
                .map_err(|e| LangbaseError::InvalidResponse {
                    message: format!("Failed to parse response: {}", e),
                })?;

        if !pipe_response.success {
            return Err(LangbaseError::InvalidResponse {
                message: "Pipe reported success=false".to_string(),
            });
        }

        Ok(pipe_response)
    }

    /// Get the base URL (for testing)
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Create a new pipe
    pub async fn create_pipe(
        &self,
        request: CreatePipeRequest,
    ) -> LangbaseResult<CreatePipeResponse> {
        let url = format!("{}/v1/pipes", self.base_url);

        info!(pipe = %request.name, "Creating Langbase pipe");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(LangbaseError::Http)?;

        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(LangbaseError::Api {
                status: status.as_u16(),
                message: error_body,
            });
        }

        let pipe_response: CreatePipeResponse =
            response
                .json()
                .await
                .map_err(|e| LangbaseError::InvalidResponse {
                    message: format!("Failed to parse create pipe response: {}", e),
                })?;

        info!(
            pipe = %pipe_response.name,
            url = %pipe_response.url,
            "Pipe created successfully"
        );

        Ok(pipe_response)
    }

    /// Ensure a pipe exists, creating it if needed. An existing pipe is not an error.
    pub async fn ensure_pipe(&self, request: CreatePipeRequest) -> LangbaseResult<()> {
        let pipe_name = request.name.clone();
        match self.create_pipe(request).await {
            Ok(_) => {
                info!(pipe = %pipe_name, "Pipe ready");
                Ok(())
            }
            Err(LangbaseError::Api { status: 409, .. }) => {
                info!(pipe = %pipe_name, "Pipe already exists");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Ensure the analysis and judge pipes exist.
    pub async fn ensure_pipes(&self, pipes: &PipeConfig) -> LangbaseResult<()> {
        let analysis = CreatePipeRequest::new(&pipes.analysis)
            .with_description("Dynamic temperature adjustment analysis stages")
            .with_status(PipeStatus::Private)
            .with_model("openai:gpt-4o-mini")
            .with_upsert(true)
            .with_store(false)
            .with_messages(vec![Message::system(ANALYSIS_PIPE_PROMPT)]);
        self.ensure_pipe(analysis).await?;

        let judge = CreatePipeRequest::new(&pipes.judge)
            .with_description("Blind pairwise judge")
            .with_status(PipeStatus::Private)
            .with_upsert(true)
            .with_json_output(true)
            .with_store(false)
            .with_messages(vec![Message::system(JUDGE_SYSTEM_PROMPT)]);
        self.ensure_pipe(judge).await
    }
}

#[async_trait]
impl LlmProvider for LangbaseClient {
    async fn execute(&self, request: CompletionRequest) -> LangbaseResult<Completion> {
        let start = Instant::now();
        let response = self.call_pipe(request.to_pipe_request()).await?;
        let latency_ms = start.elapsed().as_millis() as i64;

        let (model, usage) = match response.raw.as_ref() {
            Some(raw) => (raw.model.clone(), raw.usage.as_ref()),
            None => (None, None),
        };
        let usage = TokenUsage::from_provider(usage, &request.prompt_text(), &response.completion);

        Ok(Completion {
            text: response.completion,
            model,
            usage,
            latency_ms,
        })
    }
}

/// Exponential backoff before the given retry (1-based), saturating at `u64::MAX`.
fn backoff_delay_ms(base_ms: u64, retry: u32) -> u64 {
    base_ms.saturating_mul(2_u64.saturating_pow(retry.saturating_sub(1)))
}

/// Client errors (4xx other than 408/429) will not succeed on retry.
fn is_retryable(err: &LangbaseError) -> bool {
    match err {
        LangbaseError::Api { status, .. } => {
            *status >= 500 || *status == 408 || *status == 429
        }
        LangbaseError::InvalidResponse { .. } => false,
        _ => true,
    }
}
