//! Agent definitions for the interview coach.
//!
//! Two specialist agents answer turns: a knowledge-base interviewer backed by
//! hosted file search, and a web-search agent for current information. A
//! triage step (see [`crate::router`]) picks one of them per turn; this module
//! only describes who they are and what tools they carry.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

/// Maximum number of passages the hosted file search returns per query.
pub const FILE_SEARCH_MAX_RESULTS: u32 = 3;

/// The specialist agents a turn can be routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    /// Behavioural interviewer grounded in the uploaded knowledge base.
    Knowledge,
    /// Answers questions that need up-to-date information from the web.
    Search,
}

impl AgentKind {
    pub fn name(&self) -> &'static str {
        match self {
            AgentKind::Knowledge => "KnowledgeAgent",
            AgentKind::Search => "SearchAgent",
        }
    }

    /// Parses a triage label such as `"search"` or `"KnowledgeAgent"`.
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label
            .trim()
            .trim_matches(|c: char| !c.is_ascii_alphanumeric())
            .to_ascii_lowercase();
        match label.as_str() {
            "knowledge" | "knowledgeagent" | "knowledge_agent" => Some(AgentKind::Knowledge),
            "search" | "searchagent" | "search_agent" => Some(AgentKind::Search),
            _ => None,
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A hosted tool the agent may call while answering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentTool {
    FileSearch {
        vector_store_ids: Vec<String>,
        max_num_results: u32,
    },
    WebSearch,
}

impl AgentTool {
    /// The tool definition in the Responses API wire format.
    pub fn to_request_json(&self) -> serde_json::Value {
        match self {
            AgentTool::FileSearch {
                vector_store_ids,
                max_num_results,
            } => serde_json::json!({
                "type": "file_search",
                "vector_store_ids": vector_store_ids,
                "max_num_results": max_num_results,
            }),
            AgentTool::WebSearch => serde_json::json!({ "type": "web_search_preview" }),
        }
    }
}

/// Everything needed to ask one agent for a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentProfile {
    pub kind: AgentKind,
    pub instructions: String,
    pub tools: Vec<AgentTool>,
}

impl AgentProfile {
    pub fn name(&self) -> &'static str {
        self.kind.name()
    }
}

/// The instruction texts loaded from the prompts directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompts {
    pub knowledge_agent: String,
    pub search_agent: String,
    pub triage_agent: String,
    pub voice_style: String,
}

impl Prompts {
    const REQUIRED: [&'static str; 4] =
        ["knowledge_agent", "search_agent", "triage_agent", "voice_style"];

    /// Loads every `.md` file in `prompts_path`, keyed by file stem, and
    /// checks that the four prompts the coach needs are present.
    pub fn load(prompts_path: &Path) -> Result<Self> {
        let mut prompts = load_prompt_files(prompts_path)?;
        for key in Self::REQUIRED {
            if !prompts.contains_key(key) {
                anyhow::bail!(
                    "{key}.md not found in prompts directory {}",
                    prompts_path.display()
                );
            }
        }
        let mut take = |key: &str| prompts.remove(key).unwrap_or_default();
        Ok(Self {
            knowledge_agent: take("knowledge_agent"),
            search_agent: take("search_agent"),
            triage_agent: take("triage_agent"),
            voice_style: take("voice_style"),
        })
    }
}

fn load_prompt_files(prompts_path: &Path) -> Result<HashMap<String, String>> {
    let mut prompts = HashMap::new();
    let entries = std::fs::read_dir(prompts_path).with_context(|| {
        format!(
            "Could not read prompts directory {}",
            prompts_path.display()
        )
    })?;
    for entry in entries {
        let path = entry?.path();
        if path.is_file() && path.extension().and_then(|s| s.to_str()) == Some("md") {
            let key = path
                .file_stem()
                .and_then(|s| s.to_str())
                .context("Could not get file stem")?
                .to_string();
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Could not read prompt {}", path.display()))?;
            prompts.insert(key, content.trim().to_string());
        }
    }
    Ok(prompts)
}

/// The fixed set of specialist agents, dispatched by [`AgentKind`].
#[derive(Debug, Clone)]
pub struct AgentRoster {
    knowledge: AgentProfile,
    search: AgentProfile,
}

impl AgentRoster {
    /// Wires the prompts and the knowledge-base vector store into both agents.
    pub fn new(prompts: &Prompts, vector_store_id: impl Into<String>) -> Self {
        Self {
            knowledge: AgentProfile {
                kind: AgentKind::Knowledge,
                instructions: prompts.knowledge_agent.clone(),
                tools: vec![AgentTool::FileSearch {
                    vector_store_ids: vec![vector_store_id.into()],
                    max_num_results: FILE_SEARCH_MAX_RESULTS,
                }],
            },
            search: AgentProfile {
                kind: AgentKind::Search,
                instructions: prompts.search_agent.clone(),
                tools: vec![AgentTool::WebSearch],
            },
        }
    }

    pub fn profile(&self, kind: AgentKind) -> &AgentProfile {
        match kind {
            AgentKind::Knowledge => &self.knowledge,
            AgentKind::Search => &self.search,
        }
    }
}
