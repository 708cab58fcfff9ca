//! Voice Session Loop
//!
//! Drives the turn-based conversation: wait for the user to start, record one
//! utterance, run it through the remote pipeline, play the answer, repeat.
//!
//! ```text
//!   Idle --start--> Recording --stop--> Processing --> Playing --> Idle
//!     \
//!      `--exit--> Terminated
//! ```
//!
//! Any failure inside a turn is reported and the loop returns to `Idle`; only
//! an explicit exit ends the session.

use crate::audio::{
    AudioDevice, CaptureConfig, CaptureEvent, CaptureGuard, ResponseAudio, Utterance,
    capture_channel,
};
use crate::error::VoiceError;
use crate::pipeline::RemoteAgentPipeline;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Where the session currently is in its turn cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Recording,
    Processing,
    Playing,
    Terminated,
}

/// A user intention read from the console.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Start,
    Stop,
    Exit,
}

impl Signal {
    const EXIT_WORDS: [&'static str; 3] = ["esc", "exit", "quit"];

    /// Interprets one line of console input given the current state.
    ///
    /// While idle, Enter starts a turn and any other text is ignored; while
    /// recording, any line stops it. Exit words end the session in both.
    pub fn parse(line: &str, state: SessionState) -> Option<Self> {
        let word = line.trim();
        if Self::EXIT_WORDS
            .iter()
            .any(|exit| word.eq_ignore_ascii_case(exit))
        {
            return Some(Signal::Exit);
        }
        match state {
            SessionState::Idle if word.is_empty() => Some(Signal::Start),
            SessionState::Idle => None,
            SessionState::Recording => Some(Signal::Stop),
            _ => None,
        }
    }
}

/// Messages the loop shows to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Ready,
    Recording,
    Processing { samples: usize },
    Playing { samples: usize },
    TurnFailed(VoiceError),
    Goodbye,
}

/// The user-facing side of the loop: signals in, notices out.
#[async_trait]
pub trait Console: Send {
    /// Waits for the next signal that is meaningful in `state`.
    ///
    /// Must be cancel-safe: the loop polls it alongside the capture channel.
    async fn next_signal(&mut self, state: SessionState) -> Signal;

    fn notify(&mut self, notice: Notice);
}

#[derive(Debug, Clone, Default)]
pub struct LoopConfig {
    /// Optional bound on one pipeline call, including draining its events.
    pub pipeline_timeout: Option<Duration>,
}

/// Counters for one completed turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnSummary {
    pub captured_samples: usize,
    pub response_samples: usize,
}

enum TurnOutcome {
    Completed(TurnSummary),
    ExitRequested,
}

/// How a finished session went.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionReport {
    pub completed_turns: usize,
    pub failed_turns: usize,
}

pub struct VoiceSessionLoop<C: Console> {
    device: Arc<dyn AudioDevice>,
    pipeline: Arc<dyn RemoteAgentPipeline>,
    console: C,
    config: LoopConfig,
    state: SessionState,
}

impl<C: Console> VoiceSessionLoop<C> {
    pub fn new(
        device: Arc<dyn AudioDevice>,
        pipeline: Arc<dyn RemoteAgentPipeline>,
        console: C,
        config: LoopConfig,
    ) -> Self {
        Self {
            device,
            pipeline,
            console,
            config,
            state: SessionState::Idle,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn console(&self) -> &C {
        &self.console
    }

    /// Runs turns until the user exits.
    pub async fn run(&mut self) -> SessionReport {
        let mut report = SessionReport::default();
        loop {
            self.state = SessionState::Idle;
            self.console.notify(Notice::Ready);
            match self.console.next_signal(SessionState::Idle).await {
                Signal::Exit => break,
                Signal::Stop => {
                    warn!("Stop signalled while idle, ignoring");
                    continue;
                }
                Signal::Start => {}
            }

            match self.run_turn(report.completed_turns + report.failed_turns + 1).await {
                Ok(TurnOutcome::Completed(summary)) => {
                    report.completed_turns += 1;
                    info!(
                        captured = summary.captured_samples,
                        response = summary.response_samples,
                        "Turn complete"
                    );
                }
                Ok(TurnOutcome::ExitRequested) => {
                    info!("Exit requested during recording");
                    break;
                }
                Err(e) => {
                    report.failed_turns += 1;
                    warn!(error = %e, "Turn abandoned");
                    self.console.notify(Notice::TurnFailed(e));
                }
            }
        }
        self.state = SessionState::Terminated;
        self.console.notify(Notice::Goodbye);
        info!(
            completed = report.completed_turns,
            failed = report.failed_turns,
            "Voice session terminated"
        );
        report
    }

    #[instrument(name = "turn", skip(self))]
    async fn run_turn(&mut self, turn: usize) -> Result<TurnOutcome, VoiceError> {
        let utterance = match self.record().await? {
            Some(utterance) => utterance,
            None => return Ok(TurnOutcome::ExitRequested),
        };
        let captured_samples = utterance.len();

        self.state = SessionState::Processing;
        self.console.notify(Notice::Processing {
            samples: captured_samples,
        });
        let response = self.process(utterance).await?;

        self.state = SessionState::Playing;
        self.console.notify(Notice::Playing {
            samples: response.len(),
        });
        self.device
            .play(response.samples(), ResponseAudio::SAMPLE_RATE)
            .await?;

        Ok(TurnOutcome::Completed(TurnSummary {
            captured_samples,
            response_samples: response.len(),
        }))
    }

    /// Records until stop. `None` means the user asked to exit instead.
    async fn record(&mut self) -> Result<Option<Utterance>, VoiceError> {
        let sample_rate = self.device.default_input_sample_rate()?;
        let (tx, mut rx) = capture_channel();
        let stream = self
            .device
            .open_input_stream(CaptureConfig::mono(sample_rate), tx)?;
        let guard = CaptureGuard::new(stream);

        self.state = SessionState::Recording;
        self.console.notify(Notice::Recording);
        debug!(sample_rate, "Capture stream open");

        let mut chunks: Vec<Vec<i16>> = Vec::new();
        let console = &mut self.console;
        let stop = console.next_signal(SessionState::Recording);
        tokio::pin!(stop);

        let ended = loop {
            tokio::select! {
                biased;
                Some(event) = rx.recv() => match event {
                    CaptureEvent::Chunk(chunk) => chunks.push(chunk),
                    CaptureEvent::Failed(msg) => break Err(VoiceError::Device(msg)),
                },
                signal = &mut stop => break Ok(signal),
            }
        };

        // The stream must be released before anything else can fail.
        let closed = guard.close();
        let signal = ended?;
        if signal == Signal::Exit {
            // Anything the device reports now belongs to a turn being discarded.
            if let Err(e) = closed {
                debug!(error = %e, "Ignoring capture error after exit");
            }
            return Ok(None);
        }
        closed?;
        while let Ok(event) = rx.try_recv() {
            match event {
                CaptureEvent::Chunk(chunk) => chunks.push(chunk),
                CaptureEvent::Failed(msg) => return Err(VoiceError::Device(msg)),
            }
        }

        debug!(chunks = chunks.len(), "Recording stopped");
        Utterance::from_chunks(chunks, sample_rate).map(Some)
    }

    async fn process(&self, utterance: Utterance) -> Result<ResponseAudio, VoiceError> {
        let pipeline = self.pipeline.clone();
        let call = async move {
            let events = pipeline.run(utterance.into_input()).await?;
            ResponseAudio::collect(events).await
        };
        match self.config.pipeline_timeout {
            Some(limit) => tokio::time::timeout(limit, call).await.map_err(|_| {
                VoiceError::RemotePipeline(format!(
                    "no complete response after {} seconds",
                    limit.as_secs()
                ))
            })?,
            None => call.await,
        }
    }
}
