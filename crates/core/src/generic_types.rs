use crate::agent::AgentKind;
use crate::error::VoiceError;
use futures::Stream;
use std::pin::Pin;

/// Typed events emitted by a remote pipeline for one turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceEvent {
    /// A chunk of synthesized response audio (PCM16, 24 kHz, mono).
    Audio(Vec<i16>),
    /// The transcription of the user's speech.
    Transcription { text: String },
    /// The triage step handed the turn to an agent.
    AgentSelected { agent: AgentKind },
    /// The agent's full text reply, before synthesis.
    AgentText(String),
    /// No further events will follow for this turn.
    TurnComplete,
}

impl VoiceEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            VoiceEvent::Audio(_) => "audio",
            VoiceEvent::Transcription { .. } => "transcription",
            VoiceEvent::AgentSelected { .. } => "agent_selected",
            VoiceEvent::AgentText(_) => "agent_text",
            VoiceEvent::TurnComplete => "turn_complete",
        }
    }
}

/// A lazy, single-pass sequence of pipeline events.
pub type VoiceEventStream = Pin<Box<dyn Stream<Item = Result<VoiceEvent, VoiceError>> + Send>>;
