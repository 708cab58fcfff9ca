use coach_core::knowledge::DEFAULT_SOURCES;
use coach_core::openai_http::DEFAULT_API_BASE;
use secrecy::SecretString;
use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// How the triage step picks an agent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IntentRouter {
    /// Ask the router model, falling back to keywords.
    Llm,
    /// Keywords only; no extra request per turn.
    Keyword,
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Debug)]
pub struct Config {
    pub openai_api_key: SecretString,
    pub openai_api_base: String,
    pub agent_model: String,
    pub router_model: String,
    pub intent_router: IntentRouter,
    pub transcription_model: String,
    pub tts_model: String,
    pub tts_voice: String,
    pub prompts_path: PathBuf,
    pub kb_root: PathBuf,
    pub vector_store_name: String,
    /// Reuse this store instead of creating and filling a new one.
    pub vector_store_id: Option<String>,
    pub pipeline_timeout: Option<Duration>,
    pub log_level: Level,
}

fn var_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let openai_api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty())
            .map(SecretString::from)
            .ok_or_else(|| ConfigError::MissingVar("OPENAI_API_KEY".to_string()))?;

        let intent_router_str = var_or("INTENT_ROUTER", "llm");
        let intent_router = match intent_router_str.to_lowercase().as_str() {
            "llm" => IntentRouter::Llm,
            "keyword" => IntentRouter::Keyword,
            other => {
                return Err(ConfigError::InvalidValue(
                    "INTENT_ROUTER".to_string(),
                    format!("'{other}' is not one of 'llm' or 'keyword'"),
                ));
            }
        };

        let pipeline_timeout = match std::env::var("PIPELINE_TIMEOUT_SECS") {
            Ok(raw) => {
                let secs = raw.trim().parse::<u64>().map_err(|e| {
                    ConfigError::InvalidValue("PIPELINE_TIMEOUT_SECS".to_string(), e.to_string())
                })?;
                (secs > 0).then(|| Duration::from_secs(secs))
            }
            Err(_) => None,
        };

        let log_level_str = var_or("RUST_LOG", "INFO");
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            openai_api_key,
            openai_api_base: var_or("OPENAI_API_BASE", DEFAULT_API_BASE),
            agent_model: var_or("AGENT_MODEL", "gpt-4o-mini"),
            router_model: var_or("ROUTER_MODEL", "gpt-4o-mini"),
            intent_router,
            transcription_model: var_or("TRANSCRIPTION_MODEL", "gpt-4o-transcribe"),
            tts_model: var_or("TTS_MODEL", "gpt-4o-mini-tts"),
            tts_voice: var_or("TTS_VOICE", "alloy"),
            prompts_path: PathBuf::from(var_or("PROMPTS_PATH", "./prompts")),
            kb_root: PathBuf::from(var_or("KB_ROOT", "./kb")),
            vector_store_name: var_or("VECTOR_STORE_NAME", "Interview_KB_PM_Intern"),
            vector_store_id: std::env::var("VECTOR_STORE_ID")
                .ok()
                .filter(|id| !id.trim().is_empty()),
            pipeline_timeout,
            log_level,
        })
    }

    /// The knowledge files to upload, resolved against `kb_root`.
    pub fn kb_sources(&self) -> Vec<PathBuf> {
        DEFAULT_SOURCES
            .iter()
            .map(|source| self.kb_root.join(source))
            .collect()
    }
}
