use crate::audio::AudioInput;
use crate::audio_utils::encode_wav_i16;
use anyhow::{Context, Result};
use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{AudioInput as UploadAudio, CreateTranscriptionRequestArgs},
};
use async_trait::async_trait;
use tracing::debug;

/// Turns a recorded utterance into text.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SpeechToText: Send + Sync {
    async fn transcribe(&self, input: &AudioInput) -> Result<String>;
}

/// Hosted transcription through the audio endpoint.
pub struct OpenAITranscriber {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAITranscriber {
    pub fn new(config: OpenAIConfig, model: String) -> Self {
        Self {
            client: Client::with_config(config),
            model,
        }
    }
}

#[async_trait]
impl SpeechToText for OpenAITranscriber {
    async fn transcribe(&self, input: &AudioInput) -> Result<String> {
        let wav = encode_wav_i16(&input.buffer, input.sample_rate);
        debug!(bytes = wav.len(), model = %self.model, "Uploading utterance for transcription");

        let request = CreateTranscriptionRequestArgs::default()
            .file(UploadAudio::from_vec_u8("utterance.wav".to_string(), wav))
            .model(&self.model)
            .build()?;

        let response = self
            .client
            .audio()
            .transcribe(request)
            .await
            .context("Transcription request failed")?;
        Ok(response.text)
    }
}
