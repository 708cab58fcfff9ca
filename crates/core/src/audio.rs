//! Audio buffers and the device seam used by the voice loop.
//!
//! The loop never touches hardware directly. It asks an [`AudioDevice`] for a
//! capture stream, receives copied chunks over a bounded channel, and hands the
//! finished response back to the same device for playback.

use crate::audio_utils::OPENAI_TTS_PCM16_SAMPLE_RATE;
use crate::error::VoiceError;
use crate::generic_types::VoiceEvent;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tracing::debug;

/// Chunks in flight between the capture callback and the loop.
pub const CAPTURE_CHANNEL_CAPACITY: usize = 4096;

/// Messages sent from a capture callback to the loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEvent {
    /// An owned copy of one hardware buffer, already mono.
    Chunk(Vec<i16>),
    /// The device reported a stream error; the turn must be abandoned.
    Failed(String),
}

pub type CaptureSender = mpsc::Sender<CaptureEvent>;
pub type CaptureReceiver = mpsc::Receiver<CaptureEvent>;

/// Creates the bounded hand-off channel for one recording.
pub fn capture_channel() -> (CaptureSender, CaptureReceiver) {
    mpsc::channel(CAPTURE_CHANNEL_CAPACITY)
}

/// Parameters for opening an input stream.
///
/// Chunks are always delivered mono; devices downmix whatever channel layout
/// the hardware uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureConfig {
    pub sample_rate: u32,
}

impl CaptureConfig {
    /// Mono capture at the given native rate.
    pub fn mono(sample_rate: u32) -> Self {
        Self { sample_rate }
    }
}

/// An open capture stream owned by exactly one turn.
///
/// Implementations must release the hardware when dropped, so a turn that
/// unwinds early never leaks the handle.
pub trait CaptureStream: Send {
    /// Stops capture and releases the device. Calling it twice is a no-op.
    ///
    /// Returns an error if the stream lost data while it was open.
    fn close(&mut self) -> Result<(), VoiceError>;

    fn is_open(&self) -> bool;
}

/// Capture and playback hardware.
#[async_trait]
pub trait AudioDevice: Send + Sync {
    /// The native sample rate of the default input device.
    fn default_input_sample_rate(&self) -> Result<u32, VoiceError>;

    /// Opens an input stream; every callback sends a copy of its chunk to `chunks`.
    fn open_input_stream(
        &self,
        config: CaptureConfig,
        chunks: CaptureSender,
    ) -> Result<Box<dyn CaptureStream>, VoiceError>;

    /// Plays a mono buffer and resolves once playback has finished.
    async fn play(&self, buffer: &[i16], sample_rate: u32) -> Result<(), VoiceError>;
}

/// Closes a capture stream on every exit path, including unwinding.
pub struct CaptureGuard {
    stream: Box<dyn CaptureStream>,
}

impl CaptureGuard {
    pub fn new(stream: Box<dyn CaptureStream>) -> Self {
        Self { stream }
    }

    pub fn close(mut self) -> Result<(), VoiceError> {
        self.stream.close()
    }
}

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        if self.stream.is_open() {
            if let Err(e) = self.stream.close() {
                tracing::warn!(error = %e, "Capture stream reported an error while being released");
            }
        }
    }
}

/// The descriptor handed to the remote pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioInput {
    pub buffer: Vec<i16>,
    pub sample_rate: u32,
}

/// One recorded user utterance: captured chunks joined in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utterance {
    samples: Vec<i16>,
    sample_rate: u32,
}

impl Utterance {
    /// Concatenates chunks along the sample axis.
    ///
    /// An utterance with no chunks, or only empty ones, is not valid pipeline
    /// input and yields [`VoiceError::EmptyCapture`].
    pub fn from_chunks(chunks: Vec<Vec<i16>>, sample_rate: u32) -> Result<Self, VoiceError> {
        let total: usize = chunks.iter().map(Vec::len).sum();
        if total == 0 {
            return Err(VoiceError::EmptyCapture);
        }
        let mut samples = Vec::with_capacity(total);
        for chunk in chunks {
            samples.extend_from_slice(&chunk);
        }
        Ok(Self {
            samples,
            sample_rate,
        })
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn into_input(self) -> AudioInput {
        AudioInput {
            buffer: self.samples,
            sample_rate: self.sample_rate,
        }
    }
}

/// The synthesized reply, always at the speech endpoint's output rate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseAudio {
    samples: Vec<i16>,
}

impl ResponseAudio {
    pub const SAMPLE_RATE: u32 = OPENAI_TTS_PCM16_SAMPLE_RATE;

    /// Drains an event stream, keeping only audio chunks in arrival order.
    ///
    /// The first stream error aborts collection. Non-audio events are skipped.
    pub async fn collect<S>(mut events: S) -> Result<Self, VoiceError>
    where
        S: Stream<Item = Result<VoiceEvent, VoiceError>> + Unpin,
    {
        let mut samples = Vec::new();
        while let Some(event) = events.next().await {
            match event? {
                VoiceEvent::Audio(chunk) => samples.extend_from_slice(&chunk),
                other => debug!(event = ?other.kind(), "Skipping non-audio pipeline event"),
            }
        }
        Ok(Self { samples })
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentKind;
    use futures::stream;

    #[test]
    fn test_utterance_preserves_order_and_length() {
        let chunks = vec![vec![1, 2, 3], vec![], vec![4], vec![5, 6]];
        let utterance = Utterance::from_chunks(chunks, 44100).unwrap();
        assert_eq!(utterance.samples(), &[1, 2, 3, 4, 5, 6]);
        assert_eq!(utterance.len(), 6);
        assert_eq!(utterance.sample_rate(), 44100);

        let input = utterance.into_input();
        assert_eq!(input.sample_rate, 44100);
        assert_eq!(input.buffer.len(), 6);
    }

    #[test]
    fn test_utterance_length_is_sum_of_chunks() {
        let chunks: Vec<Vec<i16>> = (1..=10).map(|n| vec![n as i16; n * 7]).collect();
        let expected: usize = chunks.iter().map(Vec::len).sum();
        let utterance = Utterance::from_chunks(chunks.clone(), 16000).unwrap();
        assert_eq!(utterance.len(), expected);
        assert_eq!(utterance.samples(), chunks.concat().as_slice());
    }

    #[test]
    fn test_utterance_rejects_empty_capture() {
        assert_eq!(
            Utterance::from_chunks(vec![], 48000),
            Err(VoiceError::EmptyCapture)
        );
        assert_eq!(
            Utterance::from_chunks(vec![vec![], vec![]], 48000),
            Err(VoiceError::EmptyCapture)
        );
    }

    #[tokio::test]
    async fn test_response_keeps_only_audio_events() {
        let events = stream::iter(vec![
            Ok(VoiceEvent::Transcription {
                text: "hello".into(),
            }),
            Ok(VoiceEvent::Audio(vec![1, 2])),
            Ok(VoiceEvent::AgentSelected {
                agent: AgentKind::Knowledge,
            }),
            Ok(VoiceEvent::Audio(vec![3])),
            Ok(VoiceEvent::TurnComplete),
        ]);
        let response = ResponseAudio::collect(events).await.unwrap();
        assert_eq!(response.samples(), &[1, 2, 3]);
    }

    #[tokio::test]
    async fn test_response_without_audio_is_empty() {
        let events = stream::iter(vec![
            Ok(VoiceEvent::AgentText("thinking".into())),
            Ok(VoiceEvent::TurnComplete),
        ]);
        let response = ResponseAudio::collect(events).await.unwrap();
        assert!(response.is_empty());
    }

    #[tokio::test]
    async fn test_response_stops_at_first_error() {
        let events = stream::iter(vec![
            Ok(VoiceEvent::Audio(vec![1])),
            Err(VoiceError::RemotePipeline("stream reset".into())),
            Ok(VoiceEvent::Audio(vec![2])),
        ]);
        let err = ResponseAudio::collect(events).await.unwrap_err();
        assert_eq!(err, VoiceError::RemotePipeline("stream reset".into()));
    }

    struct TrackedStream {
        open: bool,
        closes: std::sync::Arc<std::sync::atomic::AtomicUsize>,
    }

    impl CaptureStream for TrackedStream {
        fn close(&mut self) -> Result<(), VoiceError> {
            if self.open {
                self.open = false;
                self.closes
                    .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }
            Ok(())
        }

        fn is_open(&self) -> bool {
            self.open
        }
    }

    #[test]
    fn test_capture_guard_releases_on_drop() {
        let closes = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        {
            let _guard = CaptureGuard::new(Box::new(TrackedStream {
                open: true,
                closes: closes.clone(),
            }));
        }
        assert_eq!(closes.load(std::sync::atomic::Ordering::SeqCst), 1);

        let guard = CaptureGuard::new(Box::new(TrackedStream {
            open: true,
            closes: closes.clone(),
        }));
        guard.close().unwrap();
        assert_eq!(closes.load(std::sync::atomic::Ordering::SeqCst), 2);
    }
}
