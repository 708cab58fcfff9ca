use async_trait::async_trait;
use coach_core::session::{Console, Notice, SessionState, Signal};
use std::io::Write;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines};
use tracing::warn;

/// A line-oriented console: signals come from a reader, notices go to a writer.
pub struct LineConsole<R, W> {
    lines: Lines<BufReader<R>>,
    out: W,
}

/// The interactive terminal.
pub type StdinConsole = LineConsole<tokio::io::Stdin, std::io::Stdout>;

impl StdinConsole {
    pub fn stdio() -> Self {
        LineConsole::new(tokio::io::stdin(), std::io::stdout())
    }
}

impl<R, W> LineConsole<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: Write + Send,
{
    pub fn new(reader: R, out: W) -> Self {
        Self {
            lines: BufReader::new(reader).lines(),
            out,
        }
    }

    pub fn output(&self) -> &W {
        &self.out
    }
}

fn render(notice: &Notice) -> String {
    match notice {
        Notice::Ready => "Press Enter to speak, or type 'esc' to quit.".to_string(),
        Notice::Recording => "Recording... press Enter to stop.".to_string(),
        Notice::Processing { samples } => {
            format!("Thinking... ({samples} samples captured)")
        }
        Notice::Playing { samples } if *samples == 0 => "(no spoken reply)".to_string(),
        Notice::Playing { .. } => "Speaking...".to_string(),
        Notice::TurnFailed(e) => format!("That turn failed: {e}"),
        Notice::Goodbye => "Goodbye.".to_string(),
    }
}

#[async_trait]
impl<R, W> Console for LineConsole<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: Write + Send,
{
    async fn next_signal(&mut self, state: SessionState) -> Signal {
        loop {
            // `next_line` is cancel-safe, so a pending read survives a losing select branch.
            match self.lines.next_line().await {
                Ok(Some(line)) => {
                    if let Some(signal) = Signal::parse(&line, state) {
                        return signal;
                    }
                }
                Ok(None) => return Signal::Exit,
                Err(e) => {
                    warn!(error = %e, "Console input failed, ending session");
                    return Signal::Exit;
                }
            }
        }
    }

    fn notify(&mut self, notice: Notice) {
        if let Err(e) = writeln!(self.out, "{}", render(&notice)).and_then(|_| self.out.flush()) {
            warn!(error = %e, "Could not write to console");
        }
    }
}
