//! Main entrypoint for the interview coach voice agent.
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Loading the agent prompts.
//! 3. Provisioning (or reusing) the knowledge-base vector store.
//! 4. Building the remote pipeline stages and the audio device.
//! 5. Running the voice session loop until the user exits.

use anyhow::Context;
use async_openai::config::OpenAIConfig;
use coach_core::{
    agent::{AgentRoster, Prompts},
    knowledge::{OpenAIKnowledgeBase, provision},
    llm_client::OpenAICompatibleClient,
    openai_http::OpenAIHttp,
    pipeline::VoicePipeline,
    responder::OpenAIResponsesAgent,
    router::{IntentClassifier, KeywordIntentClassifier, LlmIntentClassifier},
    session::{LoopConfig, VoiceSessionLoop},
    stt::OpenAITranscriber,
    tts::{OpenAISpeechSynthesizer, SpeechSettings},
};
use coach_voice::{
    config::{Config, IntentRouter},
    console::StdinConsole,
    device::CpalAudioDevice,
};
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Returns the id of the vector store the agents search.
async fn knowledge_store(config: &Config, openai_config: OpenAIConfig) -> anyhow::Result<String> {
    if let Some(id) = &config.vector_store_id {
        info!(vector_store_id = %id, "Reusing existing vector store");
        return Ok(id.clone());
    }

    let kb = OpenAIKnowledgeBase::new(openai_config);
    let (store, reports) = provision(&kb, &config.vector_store_name, &config.kb_sources()).await?;
    let uploaded = reports.iter().filter(|r| r.is_success()).count();
    if uploaded < reports.len() {
        warn!(
            uploaded,
            total = reports.len(),
            "Some knowledge files could not be uploaded"
        );
    }
    debug!(reports = %serde_json::to_string(&reports)?, "Upload results");
    info!(vector_store_id = %store.id, uploaded, "Knowledge base ready");
    Ok(store.id)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .with_writer(std::io::stderr)
        .init();
    info!("Configuration loaded. Preparing the voice agent...");

    // --- 2. Load Prompts ---
    let prompts = Prompts::load(&config.prompts_path).context("Failed to load prompts")?;

    // --- 3. Knowledge Base ---
    let api_key = config.openai_api_key.expose_secret();
    let openai_config = OpenAIConfig::new()
        .with_api_key(api_key)
        .with_api_base(&config.openai_api_base);
    let vector_store_id = knowledge_store(&config, openai_config.clone())
        .await
        .context("Failed to prepare the knowledge base")?;

    // --- 4. Pipeline Stages ---
    let roster = AgentRoster::new(&prompts, vector_store_id);
    let classifier: Arc<dyn IntentClassifier> = match config.intent_router {
        IntentRouter::Llm => {
            let router_llm = Arc::new(OpenAICompatibleClient::new(
                openai_config.clone(),
                config.router_model.clone(),
            ));
            Arc::new(LlmIntentClassifier::new(
                router_llm,
                prompts.triage_agent.clone(),
            ))
        }
        IntentRouter::Keyword => Arc::new(KeywordIntentClassifier),
    };
    let http = Arc::new(OpenAIHttp::new(
        config.openai_api_base.clone(),
        SecretString::from(api_key.to_string()),
    ));
    let pipeline = Arc::new(VoicePipeline::new(
        Arc::new(OpenAITranscriber::new(
            openai_config,
            config.transcription_model.clone(),
        )),
        classifier,
        roster,
        Arc::new(OpenAIResponsesAgent::new(
            http.clone(),
            config.agent_model.clone(),
        )),
        Arc::new(OpenAISpeechSynthesizer::new(
            http,
            SpeechSettings {
                model: config.tts_model.clone(),
                voice: config.tts_voice.clone(),
                instructions: prompts.voice_style.clone(),
            },
        )),
    ));

    // --- 5. Run the Session ---
    info!(
        agent_model = %config.agent_model,
        router = ?config.intent_router,
        transcription_model = %config.transcription_model,
        tts_model = %config.tts_model,
        voice = %config.tts_voice,
        "Voice agent configured. Starting session..."
    );
    let mut session = VoiceSessionLoop::new(
        Arc::new(CpalAudioDevice::new()),
        pipeline,
        StdinConsole::stdio(),
        LoopConfig {
            pipeline_timeout: config.pipeline_timeout,
        },
    );
    let report = session.run().await;

    info!(
        completed = report.completed_turns,
        failed = report.failed_turns,
        "Session has ended."
    );
    Ok(())
}
