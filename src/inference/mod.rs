//! Command inference via an OpenAI-compatible chat completions endpoint

mod decode;
mod proposal;

pub use decode::{DecodeAttempt, DecodeStrategy, STRATEGIES, decode_json};
pub use proposal::{CommandProposal, SHELL_CHAIN_TOKENS};

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::config::LlmConfig;
use crate::repo::RepoSnapshot;
use crate::{Error, Result};

/// History entries included in the prompt
pub const HISTORY_CONTEXT: usize = 5;

/// Turns an utterance plus repository context into a command proposal
#[async_trait]
pub trait CommandInference: Send + Sync {
    /// Infer one command
    ///
    /// # Errors
    ///
    /// Fails when the service is unreachable, answers with a non-success
    /// status, or the reply cannot be decoded into a valid proposal
    async fn infer(
        &self,
        utterance: &str,
        snapshot: &RepoSnapshot,
        history: &[String],
        learning_mode: bool,
    ) -> Result<CommandProposal>;
}

/// Chat completions client
pub struct CommandInferenceClient {
    client: Client,
    api_key: Option<SecretString>,
    base_url: String,
    model: String,
    temperature: f32,
}

impl CommandInferenceClient {
    /// Create a client from configuration
    ///
    /// A missing API key is reported at the first [`infer`](CommandInference::infer)
    /// call, not here.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            api_key: config
                .api_key
                .as_ref()
                .map(|k| SecretString::from(k.expose_secret().to_string())),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
        })
    }
}

#[async_trait]
impl CommandInference for CommandInferenceClient {
    async fn infer(
        &self,
        utterance: &str,
        snapshot: &RepoSnapshot,
        history: &[String],
        learning_mode: bool,
    ) -> Result<CommandProposal> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| Error::Inference("GROQ_API_KEY is not configured".to_string()))?;

        let request = ChatCompletionRequest {
            model: &self.model,
            messages: vec![
                Message {
                    role: "system",
                    content: system_prompt(utterance, snapshot, history, learning_mode),
                },
                Message {
                    role: "user",
                    content: utterance.to_string(),
                },
            ],
            temperature: self.temperature,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        tracing::debug!(model = %self.model, utterance, "requesting command inference");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Inference(format!("network error calling inference service: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = %status, "inference service error");
            return Err(Error::InferenceStatus {
                status: status.as_u16(),
                body,
            });
        }

        let result: ChatCompletionResponse = response.json().await.map_err(|e| {
            Error::Inference(format!("failed to parse inference response as JSON: {e}"))
        })?;

        let content = result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| Error::Inference("no content in inference response".to_string()))?;

        let (value, strategy) = decode_json(&content)?;
        let proposal = CommandProposal::from_value(&value)?;

        tracing::info!(
            command = %proposal.command,
            needs_clarification = proposal.needs_clarification,
            strategy = strategy.name(),
            "command inferred"
        );
        Ok(proposal)
    }
}

/// Build the system message: rules, reply schema and repository context
#[must_use]
pub fn system_prompt(
    utterance: &str,
    snapshot: &RepoSnapshot,
    history: &[String],
    learning_mode: bool,
) -> String {
    let branch = snapshot.branch.as_deref().unwrap_or("unknown");

    let upstream = match (&snapshot.upstream, snapshot.ahead_behind) {
        (Some(upstream), Some(ab)) => {
            format!("{upstream} (ahead {}, behind {})", ab.ahead, ab.behind)
        }
        (Some(upstream), None) => upstream.clone(),
        (None, _) => "none".to_string(),
    };

    let recent = if history.is_empty() {
        "none".to_string()
    } else {
        history[history.len().saturating_sub(HISTORY_CONTEXT)..].join(", ")
    };

    let learning = if learning_mode {
        "enabled (user will confirm commands)"
    } else {
        "disabled"
    };

    format!(
        r#"You are a Git command assistant. Your role is to:
1. Convert natural language into safe, non-destructive git commands
2. Only suggest single git commands (no chaining with && or ;)
3. Avoid destructive operations like force push, hard reset, or branch deletion unless explicitly requested
4. Ask for clarification if the user's intent is unclear or you need more information
5. Return responses in JSON format matching this schema:
   {{
     "command": "git <command>",
     "explanation": "Brief explanation of what this command does",
     "reasoning_tags": ["optional", "array", "of", "reasoning"],
     "needs_clarification": false,
     "clarification_question": "Optional question if needs_clarification is true"
   }}

Repository context:
- Current branch: {branch}
- Upstream: {upstream}
- Dirty working directory: {dirty}
- Staged files: {staged}
- Unstaged files: {unstaged}
- Untracked files: {untracked}
- Recent command history: {recent}
- Learning mode: {learning}

User utterance: "{utterance}"

Respond ONLY with valid JSON. If you're unsure about the user's intent, set needs_clarification to true and provide a clarification_question."#,
        dirty = if snapshot.dirty { "yes" } else { "no" },
        staged = snapshot.staged_files.len(),
        unstaged = snapshot.unstaged_files.len(),
        untracked = snapshot.untracked_files.len(),
    )
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}
