//! Microphone and speaker access through `cpal`.

use coach_core::audio::{AudioDevice, CaptureConfig, CaptureEvent, CaptureSender, CaptureStream};
use coach_core::audio_utils::{convert_f32_to_i16, convert_i16_to_f32, downmix_to_mono, resample};
use coach_core::error::VoiceError;
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample};
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapRb};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, info, warn};

/// Seconds of output audio buffered between the feeder and the output callback.
const PLAYBACK_RING_SECONDS: f32 = 0.5;
/// How long the feeder waits before retrying a full ring.
const FEED_RETRY_INTERVAL: Duration = Duration::from_millis(10);
/// Extra time allowed for the device to drain after the ring was last filled.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// The default host's input and output devices.
#[derive(Debug, Default)]
pub struct CpalAudioDevice;

impl CpalAudioDevice {
    pub fn new() -> Self {
        let host = cpal::default_host();
        let input = host
            .default_input_device()
            .and_then(|d| d.name().ok())
            .unwrap_or_else(|| "<none>".to_string());
        let output = host
            .default_output_device()
            .and_then(|d| d.name().ok())
            .unwrap_or_else(|| "<none>".to_string());
        info!(host = ?host.id(), %input, %output, "Audio devices selected");
        Self
    }
}

#[async_trait]
impl AudioDevice for CpalAudioDevice {
    fn default_input_sample_rate(&self) -> Result<u32, VoiceError> {
        let device = cpal::default_host()
            .default_input_device()
            .ok_or_else(|| VoiceError::Device("No input device available".to_string()))?;
        let config = device.default_input_config().map_err(VoiceError::device)?;
        Ok(config.sample_rate().0)
    }

    fn open_input_stream(
        &self,
        config: CaptureConfig,
        chunks: CaptureSender,
    ) -> Result<Box<dyn CaptureStream>, VoiceError> {
        let stream = CpalCaptureStream::spawn(config, chunks)?;
        Ok(Box::new(stream))
    }

    async fn play(&self, buffer: &[i16], sample_rate: u32) -> Result<(), VoiceError> {
        if buffer.is_empty() {
            debug!("Nothing to play");
            return Ok(());
        }
        let samples = buffer.to_vec();
        tokio::task::spawn_blocking(move || play_blocking(&samples, sample_rate))
            .await
            .map_err(VoiceError::device)?
    }
}

/// Runs a blocking thread hand-off without stalling other tasks.
///
/// `block_in_place` needs the multi-threaded scheduler; anywhere else the
/// call just runs inline.
fn off_runtime<T>(f: impl FnOnce() -> T) -> T {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}

/// A capture stream living on its own thread.
///
/// `cpal::Stream` is not `Send` on every platform, so the worker builds it,
/// keeps it alive, and drops it when told to stop.
pub struct CpalCaptureStream {
    stop: Option<std_mpsc::Sender<()>>,
    worker: Option<JoinHandle<()>>,
    overrun: Arc<AtomicBool>,
}

impl CpalCaptureStream {
    fn spawn(config: CaptureConfig, chunks: CaptureSender) -> Result<Self, VoiceError> {
        let overrun = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<(), VoiceError>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let worker_overrun = overrun.clone();
        let worker = thread::Builder::new()
            .name("coach-capture".to_string())
            .spawn(move || {
                let stream = match build_capture_stream(config, chunks, worker_overrun) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if ready_tx.send(Ok(())).is_err() {
                    return;
                }
                // Blocks until close() sends or the handle is dropped.
                let _ = stop_rx.recv();
                drop(stream);
                debug!("Capture stream released");
            })
            .map_err(VoiceError::device)?;

        match off_runtime(|| ready_rx.recv()) {
            Ok(Ok(())) => Ok(Self::from_parts(stop_tx, worker, overrun)),
            Ok(Err(e)) => {
                let _ = off_runtime(|| worker.join());
                Err(e)
            }
            Err(_) => {
                let _ = off_runtime(|| worker.join());
                Err(VoiceError::Device(
                    "Capture worker exited during startup".to_string(),
                ))
            }
        }
    }

    fn from_parts(
        stop: std_mpsc::Sender<()>,
        worker: JoinHandle<()>,
        overrun: Arc<AtomicBool>,
    ) -> Self {
        Self {
            stop: Some(stop),
            worker: Some(worker),
            overrun,
        }
    }
}

impl CaptureStream for CpalCaptureStream {
    fn close(&mut self) -> Result<(), VoiceError> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if off_runtime(|| worker.join()).is_err() {
            return Err(VoiceError::Device("Capture worker panicked".to_string()));
        }
        if self.overrun.load(Ordering::Acquire) {
            return Err(VoiceError::Device(
                "Capture overrun: audio arrived faster than it was consumed".to_string(),
            ));
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.worker.is_some()
    }
}

impl Drop for CpalCaptureStream {
    fn drop(&mut self) {
        if self.is_open() {
            if let Err(e) = self.close() {
                warn!(error = %e, "Capture stream closed with an error");
            }
        }
    }
}

/// Sends one mono chunk without blocking the audio callback.
///
/// A full channel is recorded as an overrun instead of dropping audio silently.
fn forward_chunk(chunks: &CaptureSender, overrun: &AtomicBool, chunk: Vec<i16>) {
    if chunk.is_empty() {
        return;
    }
    match chunks.try_send(CaptureEvent::Chunk(chunk)) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => overrun.store(true, Ordering::Release),
        // The turn is already over; nothing left to deliver to.
        Err(TrySendError::Closed(_)) => {}
    }
}

fn build_capture_stream(
    config: CaptureConfig,
    chunks: CaptureSender,
    overrun: Arc<AtomicBool>,
) -> Result<cpal::Stream, VoiceError> {
    let device = cpal::default_host()
        .default_input_device()
        .ok_or_else(|| VoiceError::Device("No input device available".to_string()))?;
    let supported = device.default_input_config().map_err(VoiceError::device)?;
    let format = supported.sample_format();
    let mut stream_config: cpal::StreamConfig = supported.config();
    stream_config.sample_rate = cpal::SampleRate(config.sample_rate);
    let channels = stream_config.channels as usize;
    debug!(?format, channels, sample_rate = config.sample_rate, "Opening input stream");

    let err_chunks = chunks.clone();
    let on_error = move |err: cpal::StreamError| {
        error!(error = %err, "Input stream error");
        let _ = err_chunks.try_send(CaptureEvent::Failed(err.to_string()));
    };

    let stream = match format {
        SampleFormat::I16 => device.build_input_stream(
            &stream_config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                forward_chunk(&chunks, &overrun, downmix_to_mono(data, channels));
            },
            on_error,
            None,
        ),
        SampleFormat::F32 => device.build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let pcm16 = convert_f32_to_i16(data);
                forward_chunk(&chunks, &overrun, downmix_to_mono(&pcm16, channels));
            },
            on_error,
            None,
        ),
        other => {
            return Err(VoiceError::Device(format!(
                "Unsupported input sample format: {other:?}"
            )));
        }
    }
    .map_err(VoiceError::device)?;

    stream.play().map_err(VoiceError::device)?;
    Ok(stream)
}

fn ring_capacity(out_rate: u32, channels: usize) -> usize {
    ((out_rate as f32 * PLAYBACK_RING_SECONDS) as usize).max(channels.max(1))
}

/// Plays a mono buffer on the default output device and waits for it to drain.
fn play_blocking(buffer: &[i16], sample_rate: u32) -> Result<(), VoiceError> {
    let device = cpal::default_host()
        .default_output_device()
        .ok_or_else(|| VoiceError::Device("No output device available".to_string()))?;
    let supported = device.default_output_config().map_err(VoiceError::device)?;
    let out_rate = supported.sample_rate().0;
    let format = supported.sample_format();
    let stream_config: cpal::StreamConfig = supported.config();
    let channels = stream_config.channels as usize;

    let mono = resample(&convert_i16_to_f32(buffer), sample_rate, out_rate)
        .map_err(VoiceError::device)?;
    debug!(
        samples = mono.len(),
        out_rate, channels, ?format, "Starting playback"
    );

    let (mut producer, consumer) = HeapRb::<f32>::new(ring_capacity(out_rate, channels)).split();
    let fed = Arc::new(AtomicBool::new(false));
    let (done_tx, done_rx) = std_mpsc::sync_channel::<Result<(), String>>(1);

    let stream = match format {
        SampleFormat::F32 => {
            build_playback_stream::<f32>(&device, &stream_config, consumer, fed.clone(), done_tx)
        }
        SampleFormat::I16 => {
            build_playback_stream::<i16>(&device, &stream_config, consumer, fed.clone(), done_tx)
        }
        other => Err(VoiceError::Device(format!(
            "Unsupported output sample format: {other:?}"
        ))),
    }?;
    stream.play().map_err(VoiceError::device)?;

    let mut pending = &mono[..];
    while !pending.is_empty() {
        let pushed = producer.push_slice(pending);
        pending = &pending[pushed..];
        if !pending.is_empty() {
            if let Ok(Err(e)) = done_rx.try_recv() {
                return Err(VoiceError::Device(e));
            }
            thread::sleep(FEED_RETRY_INTERVAL);
        }
    }
    fed.store(true, Ordering::Release);

    let budget = Duration::from_secs_f32(PLAYBACK_RING_SECONDS) + DRAIN_GRACE;
    match done_rx.recv_timeout(budget) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(VoiceError::Device(e)),
        Err(_) => Err(VoiceError::Device(
            "Playback did not finish draining".to_string(),
        )),
    }
}

fn build_playback_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut consumer: HeapCons<f32>,
    fed: Arc<AtomicBool>,
    done: std_mpsc::SyncSender<Result<(), String>>,
) -> Result<cpal::Stream, VoiceError>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels as usize;
    let err_done = done.clone();
    let mut finished = false;

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                // Read before popping: once set, an empty ring means fully played.
                let all_fed = fed.load(Ordering::Acquire);
                let mut ran_dry = false;
                for frame in data.chunks_mut(channels) {
                    let sample = match consumer.try_pop() {
                        Some(sample) => sample,
                        None => {
                            ran_dry = true;
                            0.0
                        }
                    };
                    let value = T::from_sample(sample);
                    for out in frame.iter_mut() {
                        *out = value;
                    }
                }
                if all_fed && ran_dry && !finished {
                    finished = true;
                    let _ = done.try_send(Ok(()));
                }
            },
            move |err| {
                error!(error = %err, "Output stream error");
                let _ = err_done.try_send(Err(err.to_string()));
            },
            None,
        )
        .map_err(VoiceError::device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use coach_core::audio::capture_channel;
    use tokio::sync::mpsc;

    #[test]
    fn test_forward_chunk_delivers_copy() {
        let (tx, mut rx) = capture_channel();
        let overrun = AtomicBool::new(false);

        forward_chunk(&tx, &overrun, vec![1, 2, 3]);
        forward_chunk(&tx, &overrun, Vec::new());

        assert_eq!(rx.try_recv().unwrap(), CaptureEvent::Chunk(vec![1, 2, 3]));
        assert!(rx.try_recv().is_err());
        assert!(!overrun.load(Ordering::Acquire));
    }

    #[test]
    fn test_forward_chunk_marks_overrun_when_full() {
        let (tx, _rx) = mpsc::channel(1);
        let overrun = AtomicBool::new(false);

        forward_chunk(&tx, &overrun, vec![1]);
        assert!(!overrun.load(Ordering::Acquire));
        forward_chunk(&tx, &overrun, vec![2]);
        assert!(overrun.load(Ordering::Acquire));
    }

    #[test]
    fn test_forward_chunk_ignores_closed_channel() {
        let (tx, rx) = capture_channel();
        drop(rx);
        let overrun = AtomicBool::new(false);
        forward_chunk(&tx, &overrun, vec![7]);
        assert!(!overrun.load(Ordering::Acquire));
    }

    fn idle_worker() -> (std_mpsc::Sender<()>, JoinHandle<()>) {
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let worker = thread::spawn(move || {
            let _ = stop_rx.recv();
        });
        (stop_tx, worker)
    }

    #[test]
    fn test_close_stops_worker_and_is_idempotent() {
        let (stop, worker) = idle_worker();
        let mut stream =
            CpalCaptureStream::from_parts(stop, worker, Arc::new(AtomicBool::new(false)));

        assert!(stream.is_open());
        assert_eq!(stream.close(), Ok(()));
        assert!(!stream.is_open());
        assert_eq!(stream.close(), Ok(()));
    }

    #[test]
    fn test_close_reports_overrun() {
        let (stop, worker) = idle_worker();
        let mut stream =
            CpalCaptureStream::from_parts(stop, worker, Arc::new(AtomicBool::new(true)));

        match stream.close() {
            Err(VoiceError::Device(msg)) => assert!(msg.contains("overrun")),
            other => panic!("Expected Device error, got {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_close_inside_multi_thread_runtime() {
        let (stop, worker) = idle_worker();
        let mut stream =
            CpalCaptureStream::from_parts(stop, worker, Arc::new(AtomicBool::new(false)));
        assert_eq!(stream.close(), Ok(()));
        assert!(!stream.is_open());
    }

    #[tokio::test]
    async fn test_off_runtime_runs_inline_on_current_thread() {
        assert_eq!(off_runtime(|| 7), 7);
    }

    #[test]
    fn test_ring_capacity() {
        assert_eq!(ring_capacity(48000, 2), 24000);
        assert_eq!(ring_capacity(0, 2), 2);
    }
}
