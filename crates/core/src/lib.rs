//! Core of the interview coach voice agent: the turn-based voice session loop,
//! the device and pipeline seams it drives, and the hosted implementations of
//! the pipeline stages and agent roster.

pub mod agent;
pub mod audio;
pub mod audio_utils;
pub mod error;
pub mod generic_types;
pub mod knowledge;
pub mod llm_client;
pub mod openai_http;
pub mod pipeline;
pub mod responder;
pub mod router;
pub mod session;
pub mod stt;
pub mod tts;
