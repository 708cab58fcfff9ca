//! Agent replies through the hosted Responses API.
//!
//! Tool execution (file search over the knowledge base, web search) happens
//! inside the hosted runtime; this module only sends the agent's instructions
//! and tool list and reads back the final text.

use crate::agent::AgentProfile;
use crate::openai_http::OpenAIHttp;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Produces an agent's text reply to one user message.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AgentResponder: Send + Sync {
    async fn respond(&self, agent: &AgentProfile, user_text: &str) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct ResponsesReply {
    id: String,
    #[serde(default)]
    output: Vec<OutputItem>,
}

#[derive(Debug, Deserialize)]
struct OutputItem {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    content: Vec<OutputContent>,
}

#[derive(Debug, Deserialize)]
struct OutputContent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

impl ResponsesReply {
    /// Concatenates every `output_text` part of every assistant message.
    fn output_text(&self) -> String {
        self.output
            .iter()
            .filter(|item| item.kind == "message")
            .flat_map(|item| item.content.iter())
            .filter(|part| part.kind == "output_text")
            .filter_map(|part| part.text.as_deref())
            .collect::<Vec<_>>()
            .join("")
    }

    fn tool_calls(&self) -> impl Iterator<Item = &str> {
        self.output
            .iter()
            .map(|item| item.kind.as_str())
            .filter(|kind| kind.ends_with("_call"))
    }
}

/// Calls `POST /responses`, chaining turns with `previous_response_id` so
/// the agents keep the conversation across handoffs.
pub struct OpenAIResponsesAgent {
    http: Arc<OpenAIHttp>,
    model: String,
    previous_response_id: Mutex<Option<String>>,
}

impl OpenAIResponsesAgent {
    pub fn new(http: Arc<OpenAIHttp>, model: String) -> Self {
        Self {
            http,
            model,
            previous_response_id: Mutex::new(None),
        }
    }

    fn request_body(
        &self,
        agent: &AgentProfile,
        user_text: &str,
        previous_response_id: Option<&str>,
    ) -> serde_json::Value {
        let tools: Vec<serde_json::Value> =
            agent.tools.iter().map(|t| t.to_request_json()).collect();
        let mut body = serde_json::json!({
            "model": self.model,
            "instructions": agent.instructions,
            "input": user_text,
            "tools": tools,
        });
        if let Some(id) = previous_response_id {
            body["previous_response_id"] = serde_json::Value::String(id.to_string());
        }
        body
    }
}

#[async_trait]
impl AgentResponder for OpenAIResponsesAgent {
    async fn respond(&self, agent: &AgentProfile, user_text: &str) -> Result<String> {
        let mut previous = self.previous_response_id.lock().await;
        let body = self.request_body(agent, user_text, previous.as_deref());

        let reply: ResponsesReply = self
            .http
            .post_json("responses", &body)
            .await?
            .json()
            .await
            .context("Could not decode Responses API reply")?;

        for call in reply.tool_calls() {
            debug!(agent = %agent.kind, tool = call, "Hosted tool was used");
        }
        let text = reply.output_text();
        info!(agent = %agent.kind, response_id = %reply.id, chars = text.len(), "Agent replied");

        *previous = Some(reply.id);
        Ok(text)
    }
}
