//! Chat handler
//!
//! Tokens go out as server-sent events:
//! `data: {"type":"text-delta","text":...}` per token, then `data: [DONE]`,
//! or a single `data: {"type":"error","text":...}` when the provider fails.

use super::ChatTurn;
use crate::config::AppState;
use crate::error::{ApiJson, Result};
use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
pub struct ChatRequestBody {
    #[serde(default)]
    pub messages: Vec<ChatTurn>,
}

/// POST /chat
pub async fn chat(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<ChatRequestBody>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    info!("POST /chat - {} messages", body.messages.len());

    let mut tokens = state.chat.relay(body.messages).await?;
    let production = state.config.mode.is_production();

    let stream = async_stream::stream! {
        let mut failed = false;

        while let Some(item) = tokens.next().await {
            match item {
                Ok(text) => {
                    yield Ok::<_, Infallible>(frame("text-delta", &text));
                }
                Err(e) => {
                    warn!("[Chat] Stream ended by provider error: {}", e);
                    let message = if production { e.public_message() } else { e.to_string() };
                    yield Ok::<_, Infallible>(frame("error", &message));
                    failed = true;
                    break;
                }
            }
        }

        if !failed {
            yield Ok::<_, Infallible>(Event::default().data("[DONE]"));
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn frame(kind: &str, text: &str) -> Event {
    Event::default().data(json!({ "type": kind, "text": text }).to_string())
}
