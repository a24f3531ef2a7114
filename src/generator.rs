use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::GeneratorConfig;
use crate::models::{ChatTurn, DocumentChunk, Role};
use crate::normalize::{GeneratorResponse, StructuredResponse};

/// Failure of the primary generator call. Quota exhaustion triggers the
/// fallback cascade; anything else ends the turn with a visible error.
#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("generator quota exhausted: {0}")]
    QuotaExceeded(String),
    #[error("generator call failed: {0}")]
    Other(String),
}

const QUOTA_MARKERS: &[&str] = &[
    "insufficient_quota",
    "you exceeded your current quota",
    "error code: 429",
    "rate limit",
];

impl GeneratorError {
    /// Classify a raw error message by the known quota/rate-limit substrings.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_ascii_lowercase();
        if QUOTA_MARKERS.iter().any(|marker| lower.contains(marker)) {
            GeneratorError::QuotaExceeded(message)
        } else {
            GeneratorError::Other(message)
        }
    }

    pub fn is_quota(&self) -> bool {
        matches!(self, GeneratorError::QuotaExceeded(_))
    }
}

/// The primary answer generator. Response shape is unconstrained and always
/// flows through the response normalizer.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    async fn generate(
        &self,
        query: &str,
        history: &[ChatTurn],
        context: &[DocumentChunk],
    ) -> Result<GeneratorResponse, GeneratorError>;
}

/// Optional retrieval collaborator. Absence means answer-only operation; a
/// failing call contributes zero documents.
pub trait Retriever: Send + Sync {
    fn retrieve(&self, query: &str) -> Result<Vec<DocumentChunk>>;
}

/// OpenAI-compatible chat-completions client.
#[derive(Clone)]
pub struct OpenAiGenerator {
    client: Client,
    config: GeneratorConfig,
}

impl OpenAiGenerator {
    pub fn new(config: GeneratorConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    async fn complete(&self, messages: Vec<WireMessage>) -> Result<String> {
        #[derive(Serialize)]
        struct CompletionReq<'a> {
            model: &'a str,
            messages: Vec<WireMessage>,
            temperature: f32,
        }

        #[derive(Deserialize)]
        struct CompletionResp {
            choices: Vec<CompletionChoice>,
        }

        #[derive(Deserialize)]
        struct CompletionChoice {
            message: CompletionMessage,
        }

        #[derive(Deserialize)]
        struct CompletionMessage {
            content: Option<String>,
        }

        let url = format!("{}/chat/completions", self.config.base_url);
        let mut request = self.client.post(url).json(&CompletionReq {
            model: &self.config.model,
            messages,
            temperature: self.config.temperature,
        });
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .context("failed to call chat completions endpoint")?;

        if response.status() != StatusCode::OK {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!(
                "chat completions returned {status}: {}",
                normalize_err_body(&body)
            );
        }

        let response = response
            .json::<CompletionResp>()
            .await
            .context("failed to decode chat completions response")?;

        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();

        Ok(content.trim().to_string())
    }
}

#[derive(Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

#[async_trait]
impl AnswerGenerator for OpenAiGenerator {
    async fn generate(
        &self,
        query: &str,
        history: &[ChatTurn],
        context: &[DocumentChunk],
    ) -> Result<GeneratorResponse, GeneratorError> {
        let mut messages = vec![WireMessage {
            role: "system",
            content: build_system_prompt(context),
        }];
        for turn in history {
            messages.push(WireMessage {
                role: match turn.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                },
                content: turn.content.clone(),
            });
        }
        messages.push(WireMessage {
            role: "user",
            content: query.to_string(),
        });

        let answer = self
            .complete(messages)
            .await
            .map_err(|err| GeneratorError::from_message(format!("{err:#}")))?;

        Ok(GeneratorResponse::Structured(StructuredResponse {
            answer,
            context: context.to_vec(),
        }))
    }
}

fn build_system_prompt(context: &[DocumentChunk]) -> String {
    let mut prompt = String::from(
        "You are an assistant answering questions about internal company documents. \
         Answer only from the provided context. If the context does not contain the \
         information needed, reply with an empty string.",
    );

    if !context.is_empty() {
        prompt.push_str("\n\nContext:\n");
        for chunk in context {
            prompt.push_str(&format!(
                "[{}] {}\n",
                chunk.metadata.source,
                chunk.content.trim()
            ));
        }
    }

    prompt
}

fn normalize_err_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "<empty body>".to_string();
    }

    if let Ok(json) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if let Some(err) = json
            .get("error")
            .and_then(|v| v.get("message"))
            .and_then(|v| v.as_str())
        {
            return err.to_string();
        }
    }

    trimmed.to_string()
}
