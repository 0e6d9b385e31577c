//! Chat Relay
//!
//! Forwards a chat transcript to a streaming completion provider and hands
//! back the provider's text tokens in arrival order. Dropping the returned
//! stream drops the upstream request with it.

pub mod handlers;

use crate::config::CompletionConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use genai::chat::{ChatMessage, ChatOptions, ChatRequest, ChatStreamEvent};
use genai::resolver::{AuthData, AuthResolver};
use genai::{Client as GenAIClient, ModelIden};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Incremental text tokens; an `Err` item ends the relay.
pub type TokenStream = BoxStream<'static, Result<String>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

impl ChatTurn {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SamplingParams {
    pub temperature: f64,
    pub max_tokens: u32,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 1000,
        }
    }
}

/// A streaming text-completion service.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn stream_chat(
        &self,
        turns: Vec<ChatTurn>,
        params: SamplingParams,
    ) -> Result<TokenStream>;
}

/// Provider backed by the `genai` multi-vendor client.
pub struct GenAiProvider {
    client: GenAIClient,
    model: String,
}

impl GenAiProvider {
    pub fn new(config: &CompletionConfig) -> Self {
        let api_key = config.api_key.clone();
        let auth_resolver = AuthResolver::from_resolver_fn(
            move |_model_iden: ModelIden| -> std::result::Result<
                Option<AuthData>,
                genai::resolver::Error,
            > {
                Ok(Some(AuthData::from_single(api_key.clone())))
            },
        );

        let client = GenAIClient::builder()
            .with_auth_resolver(auth_resolver)
            .build();

        info!("[Chat] Completion provider ready (model {})", config.model);

        Self {
            client,
            model: config.model.clone(),
        }
    }
}

#[async_trait]
impl CompletionProvider for GenAiProvider {
    async fn stream_chat(
        &self,
        turns: Vec<ChatTurn>,
        params: SamplingParams,
    ) -> Result<TokenStream> {
        let messages: Vec<ChatMessage> = turns
            .into_iter()
            .map(|turn| match turn.role {
                ChatRole::System => ChatMessage::system(turn.content),
                ChatRole::User => ChatMessage::user(turn.content),
                ChatRole::Assistant => ChatMessage::assistant(turn.content),
            })
            .collect();

        let options = ChatOptions::default()
            .with_temperature(params.temperature)
            .with_max_tokens(params.max_tokens);

        let response = self
            .client
            .exec_chat_stream(&self.model, ChatRequest::new(messages), Some(&options))
            .await
            .map_err(|e| Error::Upstream(format!("completion request failed: {e}")))?;

        let tokens = response.stream.filter_map(|event| async move {
            match event {
                Ok(ChatStreamEvent::Chunk(chunk)) if !chunk.content.is_empty() => {
                    Some(Ok(chunk.content))
                }
                Ok(_) => None,
                Err(e) => Some(Err(Error::Upstream(format!(
                    "completion stream failed: {e}"
                )))),
            }
        });

        Ok(tokens.boxed())
    }
}

pub struct ChatRelay {
    provider: Option<Arc<dyn CompletionProvider>>,
    params: SamplingParams,
}

impl ChatRelay {
    pub fn new(provider: Option<Arc<dyn CompletionProvider>>) -> Self {
        Self {
            provider,
            params: SamplingParams::default(),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.provider.is_some()
    }

    /// Validate the transcript and open the provider stream.
    pub async fn relay(&self, turns: Vec<ChatTurn>) -> Result<TokenStream> {
        let turns = prepare_turns(turns)?;

        let provider = self.provider.as_ref().ok_or_else(|| {
            Error::Configuration(
                "chat is not configured; set COMPLETION_API_KEY to enable it".to_string(),
            )
        })?;

        debug!("[Chat] Relaying {} messages", turns.len());
        provider.stream_chat(turns, self.params).await
    }
}

/// Earlier turns with blank content are dropped; clients keep an empty
/// assistant turn after a reply that produced no tokens. The final turn must
/// carry text.
fn prepare_turns(turns: Vec<ChatTurn>) -> Result<Vec<ChatTurn>> {
    match turns.last() {
        None => return Err(Error::Validation("messages must not be empty".to_string())),
        Some(last) if last.content.trim().is_empty() => {
            return Err(Error::Validation(
                "last message has empty content".to_string(),
            ))
        }
        Some(_) => {}
    }

    let total = turns.len();
    let kept: Vec<ChatTurn> = turns
        .into_iter()
        .filter(|t| !t.content.trim().is_empty())
        .collect();
    if kept.len() < total {
        debug!("[Chat] Dropped {} empty messages", total - kept.len());
    }
    Ok(kept)
}
