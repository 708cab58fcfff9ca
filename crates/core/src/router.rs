//! Triage: decides which specialist agent handles a turn.
//!
//! Routing is an explicit classification step over the transcribed utterance,
//! followed by a lookup in the [`AgentRoster`](crate::agent::AgentRoster).

use crate::agent::AgentKind;
use crate::llm_client::LLMClient;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

/// Picks the agent for one user utterance.
#[async_trait]
pub trait IntentClassifier: Send + Sync {
    async fn classify(&self, utterance: &str) -> AgentKind;
}

/// Phrases that signal the user wants fresh information from the web.
///
/// Matched as whole words, so "news" never fires inside "newsletter". Words
/// that show up in ordinary interview answers ("current", "recent") are left out.
const SEARCH_CUES: &[&str] = &[
    "search the web",
    "search online",
    "web search",
    "look up",
    "google",
    "latest",
    "news",
    "today",
    "this week",
    "weather",
    "stock price",
    "who won",
    "what's happening",
];

/// Lowercased words of an utterance, keeping apostrophes inside words.
fn words(utterance: &str) -> Vec<String> {
    utterance
        .to_lowercase()
        .replace('\u{2019}', "'")
        .split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .map(|word| word.trim_matches('\''))
        .filter(|word| !word.is_empty())
        .map(str::to_string)
        .collect()
}

fn contains_phrase(words: &[String], phrase: &str) -> bool {
    let phrase: Vec<&str> = phrase.split_whitespace().collect();
    words
        .windows(phrase.len())
        .any(|window| window.iter().zip(&phrase).all(|(word, cue)| word == cue))
}

/// Deterministic keyword triage. Anything without a search cue stays with the
/// interview coach.
#[derive(Debug, Default, Clone)]
pub struct KeywordIntentClassifier;

impl KeywordIntentClassifier {
    pub fn classify_text(&self, utterance: &str) -> AgentKind {
        let words = words(utterance);
        if SEARCH_CUES.iter().any(|cue| contains_phrase(&words, cue)) {
            AgentKind::Search
        } else {
            AgentKind::Knowledge
        }
    }
}

#[async_trait]
impl IntentClassifier for KeywordIntentClassifier {
    async fn classify(&self, utterance: &str) -> AgentKind {
        self.classify_text(utterance)
    }
}

/// Asks a chat model to label the intent, using the triage instructions.
///
/// When the model fails or answers with something unrecognisable, the
/// keyword classifier decides instead.
pub struct LlmIntentClassifier {
    llm: Arc<dyn LLMClient>,
    triage_instructions: String,
    fallback: KeywordIntentClassifier,
}

impl LlmIntentClassifier {
    pub fn new(llm: Arc<dyn LLMClient>, triage_instructions: impl Into<String>) -> Self {
        Self {
            llm,
            triage_instructions: triage_instructions.into(),
            fallback: KeywordIntentClassifier,
        }
    }

    fn system_prompt(&self) -> String {
        format!(
            "{}\n\nReply with exactly one word: `knowledge` to hand the user to the {} \
             or `search` to hand the user to the {}.",
            self.triage_instructions,
            AgentKind::Knowledge,
            AgentKind::Search,
        )
    }
}

#[async_trait]
impl IntentClassifier for LlmIntentClassifier {
    async fn classify(&self, utterance: &str) -> AgentKind {
        match self.llm.complete(&self.system_prompt(), utterance).await {
            Ok(answer) => match AgentKind::from_label(&answer) {
                Some(kind) => {
                    debug!(agent = %kind, "Triage model selected agent");
                    kind
                }
                None => {
                    warn!(answer = %answer, "Unrecognised triage answer, using keyword routing");
                    self.fallback.classify_text(utterance)
                }
            },
            Err(e) => {
                warn!(error = ?e, "Triage request failed, using keyword routing");
                self.fallback.classify_text(utterance)
            }
        }
    }
}
