use crate::audio_utils::Pcm16Decoder;
use crate::openai_http::OpenAIHttp;
use anyhow::Result;
use async_trait::async_trait;
use futures::{Stream, StreamExt, stream};
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, warn};

/// Response audio as it arrives: PCM16 mono chunks at 24 kHz.
pub type PcmStream = Pin<Box<dyn Stream<Item = Result<Vec<i16>>> + Send>>;

/// Turns agent text into speech.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TextToSpeech: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<PcmStream>;
}

/// Voice settings sent with every speech request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechSettings {
    pub model: String,
    pub voice: String,
    /// Free-text tone and pacing guidance.
    pub instructions: String,
}

/// Streaming speech synthesis via `POST /audio/speech` with raw PCM output.
pub struct OpenAISpeechSynthesizer {
    http: Arc<OpenAIHttp>,
    settings: SpeechSettings,
}

impl OpenAISpeechSynthesizer {
    pub fn new(http: Arc<OpenAIHttp>, settings: SpeechSettings) -> Self {
        Self { http, settings }
    }

    fn request_body(&self, text: &str) -> serde_json::Value {
        serde_json::json!({
            "model": self.settings.model,
            "voice": self.settings.voice,
            "input": text,
            "instructions": self.settings.instructions,
            "response_format": "pcm",
        })
    }
}

/// Decodes a PCM16 byte stream into sample chunks, skipping empty ones.
///
/// A body that ends halfway through a sample loses that byte; it is logged.
fn decode_pcm_stream<S, B, E>(bytes: S) -> impl Stream<Item = Result<Vec<i16>>> + Send
where
    S: Stream<Item = std::result::Result<B, E>> + Send + Unpin + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    stream::unfold(
        (bytes, Pcm16Decoder::new()),
        |(mut bytes, mut decoder)| async move {
            loop {
                match bytes.next().await {
                    Some(Ok(chunk)) => {
                        let samples = decoder.decode(chunk.as_ref());
                        if !samples.is_empty() {
                            return Some((Ok(samples), (bytes, decoder)));
                        }
                    }
                    Some(Err(e)) => {
                        let err = anyhow::Error::new(e).context("Speech stream was interrupted");
                        return Some((Err(err), (bytes, decoder)));
                    }
                    None => {
                        if decoder.has_pending_byte() {
                            warn!("Speech stream ended mid-sample, dropping the trailing byte");
                        }
                        return None;
                    }
                }
            }
        },
    )
}

#[async_trait]
impl TextToSpeech for OpenAISpeechSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<PcmStream> {
        debug!(chars = text.len(), voice = %self.settings.voice, "Requesting speech");
        let response = self
            .http
            .post_json("audio/speech", &self.request_body(text))
            .await?;

        let samples = decode_pcm_stream(Box::pin(response.bytes_stream()));
        Ok(Box::pin(samples))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::openai_http::DEFAULT_API_BASE;
    use secrecy::SecretString;

    #[tokio::test]
    async fn test_decoded_stream_joins_split_samples() {
        let body = stream::iter(vec![
            Ok::<_, std::io::Error>(vec![1u8, 0, 2]),
            Ok(vec![]),
            Ok(vec![0]),
        ]);
        let chunks: Vec<Vec<i16>> = decode_pcm_stream(body)
            .map(Result::unwrap)
            .collect()
            .await;
        assert_eq!(chunks, vec![vec![1], vec![2]]);
    }

    #[tokio::test]
    async fn test_decoded_stream_drops_dangling_byte_at_end() {
        let body = stream::iter(vec![Ok::<_, std::io::Error>(vec![3u8, 0, 9])]);
        let chunks: Vec<Vec<i16>> = decode_pcm_stream(body)
            .map(Result::unwrap)
            .collect()
            .await;
        assert_eq!(chunks, vec![vec![3]]);
    }

    #[tokio::test]
    async fn test_decoded_stream_reports_transport_errors() {
        let body = stream::iter(vec![
            Ok(vec![4u8, 0]),
            Err(std::io::Error::other("connection reset")),
        ]);
        let items: Vec<Result<Vec<i16>>> = decode_pcm_stream(body).collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), &vec![4]);
        let err = format!("{:#}", items[1].as_ref().unwrap_err());
        assert!(err.contains("Speech stream was interrupted"));
        assert!(err.contains("connection reset"));
    }

    #[test]
    fn test_speech_request_body() {
        let http = OpenAIHttp::new(DEFAULT_API_BASE, SecretString::from("sk-test".to_string()));
        let synth = OpenAISpeechSynthesizer::new(
            Arc::new(http),
            SpeechSettings {
                model: "gpt-4o-mini-tts".into(),
                voice: "alloy".into(),
                instructions: "Speak slowly.".into(),
            },
        );
        let body = synth.request_body("Hello there");
        assert_eq!(body["model"], "gpt-4o-mini-tts");
        assert_eq!(body["voice"], "alloy");
        assert_eq!(body["input"], "Hello there");
        assert_eq!(body["instructions"], "Speak slowly.");
        assert_eq!(body["response_format"], "pcm");
    }
}
