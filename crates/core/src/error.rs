use thiserror::Error;

/// Failures that abort a single voice turn.
///
/// None of these are fatal to the session: the loop reports them to the user
/// and returns to `Idle`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VoiceError {
    /// The capture or playback device failed.
    #[error("Audio device error: {0}")]
    Device(String),

    /// Recording was stopped before any audio reached the loop.
    #[error("No audio was captured, nothing to send")]
    EmptyCapture,

    /// Network or service failure while the remote pipeline was processing.
    #[error("Remote pipeline error: {0}")]
    RemotePipeline(String),
}

impl VoiceError {
    /// Wraps any provider-side failure, keeping the full context chain.
    pub fn remote(err: impl Into<anyhow::Error>) -> Self {
        Self::RemotePipeline(format!("{:#}", err.into()))
    }

    pub fn device(err: impl std::fmt::Display) -> Self {
        Self::Device(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_error_display() {
        assert_eq!(
            VoiceError::Device("no input device".into()).to_string(),
            "Audio device error: no input device"
        );
        assert_eq!(
            VoiceError::EmptyCapture.to_string(),
            "No audio was captured, nothing to send"
        );
    }

    #[test]
    fn test_remote_keeps_context_chain() {
        let err: anyhow::Result<()> = Err(anyhow::anyhow!("connection reset"));
        let err = err.context("Transcription request failed").unwrap_err();
        match VoiceError::remote(err) {
            VoiceError::RemotePipeline(msg) => {
                assert_eq!(msg, "Transcription request failed: connection reset")
            }
            other => panic!("Expected RemotePipeline, got {other:?}"),
        }
    }
}
