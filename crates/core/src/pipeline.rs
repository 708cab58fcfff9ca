//! The remote pipeline seam and its hosted implementation.
//!
//! [`VoicePipeline`] chains four hosted stages for one turn: transcription,
//! triage, the selected agent's reply, and streaming speech synthesis. Each
//! stage sits behind its own trait so the chain can be exercised without a
//! network.

use crate::agent::AgentRoster;
use crate::audio::AudioInput;
use crate::error::VoiceError;
use crate::generic_types::{VoiceEvent, VoiceEventStream};
use crate::responder::AgentResponder;
use crate::router::IntentClassifier;
use crate::stt::SpeechToText;
use crate::tts::TextToSpeech;
use async_trait::async_trait;
use futures::{StreamExt, future, stream};
use std::sync::Arc;
use tracing::{info, instrument};

/// Converts one spoken utterance into a lazy stream of response events.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteAgentPipeline: Send + Sync {
    async fn run(&self, input: AudioInput) -> Result<VoiceEventStream, VoiceError>;
}

pub struct VoicePipeline {
    stt: Arc<dyn SpeechToText>,
    classifier: Arc<dyn IntentClassifier>,
    roster: AgentRoster,
    responder: Arc<dyn AgentResponder>,
    tts: Arc<dyn TextToSpeech>,
}

impl VoicePipeline {
    pub fn new(
        stt: Arc<dyn SpeechToText>,
        classifier: Arc<dyn IntentClassifier>,
        roster: AgentRoster,
        responder: Arc<dyn AgentResponder>,
        tts: Arc<dyn TextToSpeech>,
    ) -> Self {
        Self {
            stt,
            classifier,
            roster,
            responder,
            tts,
        }
    }
}

fn finished(events: Vec<Result<VoiceEvent, VoiceError>>) -> VoiceEventStream {
    Box::pin(stream::iter(events).chain(stream::once(future::ready(Ok(VoiceEvent::TurnComplete)))))
}

#[async_trait]
impl RemoteAgentPipeline for VoicePipeline {
    #[instrument(name = "voice_pipeline", skip_all, fields(samples = input.buffer.len(), sample_rate = input.sample_rate))]
    async fn run(&self, input: AudioInput) -> Result<VoiceEventStream, VoiceError> {
        let transcript = self
            .stt
            .transcribe(&input)
            .await
            .map_err(VoiceError::remote)?
            .trim()
            .to_string();
        info!(transcript = %transcript, "User utterance transcribed");

        let mut head = vec![Ok(VoiceEvent::Transcription {
            text: transcript.clone(),
        })];
        if transcript.is_empty() {
            info!("Transcript is empty, nothing to answer");
            return Ok(finished(head));
        }

        let kind = self.classifier.classify(&transcript).await;
        info!(agent = %kind, "Handing turn to agent");
        head.push(Ok(VoiceEvent::AgentSelected { agent: kind }));

        let reply = self
            .responder
            .respond(self.roster.profile(kind), &transcript)
            .await
            .map_err(VoiceError::remote)?;
        head.push(Ok(VoiceEvent::AgentText(reply.clone())));
        if reply.trim().is_empty() {
            return Ok(finished(head));
        }

        let audio = self
            .tts
            .synthesize(&reply)
            .await
            .map_err(VoiceError::remote)?
            .map(|chunk| chunk.map(VoiceEvent::Audio).map_err(VoiceError::remote));

        Ok(Box::pin(
            stream::iter(head)
                .chain(audio)
                .chain(stream::once(future::ready(Ok(VoiceEvent::TurnComplete)))),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentKind, Prompts};
    use crate::responder::MockAgentResponder;
    use crate::router::KeywordIntentClassifier;
    use crate::stt::MockSpeechToText;
    use crate::tts::{MockTextToSpeech, PcmStream};

    fn roster() -> AgentRoster {
        let prompts = Prompts {
            knowledge_agent: "KB instructions".into(),
            search_agent: "Search instructions".into(),
            triage_agent: "Triage".into(),
            voice_style: "Calm".into(),
        };
        AgentRoster::new(&prompts, "vs_test")
    }

    fn input() -> AudioInput {
        AudioInput {
            buffer: vec![1; 160],
            sample_rate: 16000,
        }
    }

    fn pipeline(
        stt: MockSpeechToText,
        responder: MockAgentResponder,
        tts: MockTextToSpeech,
    ) -> VoicePipeline {
        VoicePipeline::new(
            Arc::new(stt),
            Arc::new(KeywordIntentClassifier),
            roster(),
            Arc::new(responder),
            Arc::new(tts),
        )
    }

    async fn drain(stream: VoiceEventStream) -> Vec<Result<VoiceEvent, VoiceError>> {
        stream.collect().await
    }

    #[tokio::test]
    async fn test_full_turn_emits_events_in_order() {
        let mut stt = MockSpeechToText::new();
        stt.expect_transcribe()
            .withf(|input| input.sample_rate == 16000 && input.buffer.len() == 160)
            .times(1)
            .returning(|_| Ok("  What is the latest news on the company?  ".to_string()));

        let mut responder = MockAgentResponder::new();
        responder
            .expect_respond()
            .withf(|agent, text| {
                agent.kind == AgentKind::Search
                    && agent.instructions == "Search instructions"
                    && text.to_string() == "What is the latest news on the company?"
            })
            .times(1)
            .returning(|_, _| Ok("They just launched a product.".to_string()));

        let mut tts = MockTextToSpeech::new();
        tts.expect_synthesize()
            .times(1)
            .returning(|_| {
                let chunks: PcmStream =
                    Box::pin(stream::iter(vec![Ok(vec![1i16; 200]), Ok(vec![2i16; 50])]));
                Ok(chunks)
            });

        let events = drain(pipeline(stt, responder, tts).run(input()).await.unwrap()).await;
        let events: Vec<VoiceEvent> = events.into_iter().map(Result::unwrap).collect();
        assert_eq!(
            events,
            vec![
                VoiceEvent::Transcription {
                    text: "What is the latest news on the company?".into()
                },
                VoiceEvent::AgentSelected {
                    agent: AgentKind::Search
                },
                VoiceEvent::AgentText("They just launched a product.".into()),
                VoiceEvent::Audio(vec![1; 200]),
                VoiceEvent::Audio(vec![2; 50]),
                VoiceEvent::TurnComplete,
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_transcript_skips_agent_and_speech() {
        let mut stt = MockSpeechToText::new();
        stt.expect_transcribe()
            .times(1)
            .returning(|_| Ok("   ".to_string()));
        let mut responder = MockAgentResponder::new();
        responder.expect_respond().times(0);
        let mut tts = MockTextToSpeech::new();
        tts.expect_synthesize().times(0);

        let events = drain(pipeline(stt, responder, tts).run(input()).await.unwrap()).await;
        let events: Vec<VoiceEvent> = events.into_iter().map(Result::unwrap).collect();
        assert_eq!(
            events,
            vec![
                VoiceEvent::Transcription { text: String::new() },
                VoiceEvent::TurnComplete
            ]
        );
    }

    #[tokio::test]
    async fn test_stage_failure_is_a_remote_error() {
        let mut stt = MockSpeechToText::new();
        stt.expect_transcribe()
            .times(1)
            .returning(|_| Ok("Give me a teamwork question".to_string()));
        let mut responder = MockAgentResponder::new();
        responder
            .expect_respond()
            .withf(|agent, _| agent.kind == AgentKind::Knowledge)
            .times(1)
            .returning(|_, _| Err(anyhow::anyhow!("503 Service Unavailable")));
        let mut tts = MockTextToSpeech::new();
        tts.expect_synthesize().times(0);

        let result = pipeline(stt, responder, tts).run(input()).await;
        match result {
            Err(VoiceError::RemotePipeline(msg)) => assert!(msg.contains("503")),
            Err(other) => panic!("Expected RemotePipeline, got {other:?}"),
            Ok(_) => panic!("Expected RemotePipeline, got a stream"),
        }
    }

    #[tokio::test]
    async fn test_speech_stream_error_surfaces_mid_stream() {
        let mut stt = MockSpeechToText::new();
        stt.expect_transcribe()
            .returning(|_| Ok("Ask me about leadership".to_string()));
        let mut responder = MockAgentResponder::new();
        responder
            .expect_respond()
            .returning(|_, _| Ok("Describe a time you led.".to_string()));
        let mut tts = MockTextToSpeech::new();
        tts.expect_synthesize().returning(|_| {
            let chunks: PcmStream = Box::pin(stream::iter(vec![
                Ok(vec![5i16; 10]),
                Err(anyhow::anyhow!("connection reset")),
            ]));
            Ok(chunks)
        });

        let events = drain(pipeline(stt, responder, tts).run(input()).await.unwrap()).await;
        assert!(matches!(events[3], Ok(VoiceEvent::Audio(ref s)) if s.len() == 10));
        assert!(matches!(events[4], Err(VoiceError::RemotePipeline(ref m)) if m.contains("connection reset")));
    }
}
