use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{
    FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig, SupportedBufferSize,
};
use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use crossbeam::queue::ArrayQueue;
use parking_lot::Mutex;

use super::{CompletionCallback, OutputGraph, SegmentHandle, SegmentRequest, Voice};
use crate::GraphError;

const VOICE_CAPACITY: usize = 64;
const STOP_CAPACITY: usize = VOICE_CAPACITY * 2;
const RETIRE_CAPACITY: usize = VOICE_CAPACITY * 2;
const DEFAULT_BLOCK_FRAMES: usize = 1024;
const MAX_BLOCK_FRAMES: usize = 4096;
const NOTIFIER_POLL: Duration = Duration::from_millis(50);

#[derive(Default)]
struct CompletionRegistry {
    callbacks: HashMap<SegmentHandle, Vec<CompletionCallback>>,
    finished: HashSet<SegmentHandle>,
}

struct RealtimeShared {
    sample_rate: u32,
    channels: usize,
    frames_rendered: AtomicU64,
    next_id: AtomicU64,
    running: AtomicBool,
    submissions: ArrayQueue<Voice>,
    stops: ArrayQueue<SegmentHandle>,
    registry: Mutex<CompletionRegistry>,
}

impl RealtimeShared {
    fn new(sample_rate: u32, channels: usize) -> Self {
        Self {
            sample_rate,
            channels,
            frames_rendered: AtomicU64::new(0),
            next_id: AtomicU64::new(0),
            running: AtomicBool::new(true),
            submissions: ArrayQueue::new(VOICE_CAPACITY),
            stops: ArrayQueue::new(STOP_CAPACITY),
            registry: Mutex::new(CompletionRegistry::default()),
        }
    }
}

/// Output graph mixing scheduled segments inside a cpal output callback.
///
/// Submissions and stop requests reach the callback through lock-free
/// queues. Finished voices leave it through a bounded channel drained by a
/// notifier thread, which runs completion callbacks and frees the voices off
/// the audio thread.
pub struct CpalGraph {
    shared: Arc<RealtimeShared>,
    notifier: Option<JoinHandle<()>>,
}

impl CpalGraph {
    pub fn sample_rate(&self) -> u32 {
        self.shared.sample_rate
    }

    pub fn channels(&self) -> usize {
        self.shared.channels
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Relaxed)
    }

    pub fn shutdown(mut self) {
        self.halt();
    }

    fn halt(&mut self) {
        self.shared.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.notifier.take() {
            if let Err(err) = handle.join() {
                tracing::error!(?err, "failed to join completion notifier thread");
            }
        }
    }
}

impl Drop for CpalGraph {
    fn drop(&mut self) {
        self.halt();
    }
}

impl OutputGraph for CpalGraph {
    fn now(&self) -> f64 {
        let frames = self.shared.frames_rendered.load(Ordering::Acquire);
        frames as f64 / self.shared.sample_rate.max(1) as f64
    }

    fn submit(&self, request: SegmentRequest) -> Result<SegmentHandle, GraphError> {
        if !self.is_running() {
            return Err(GraphError::Closed);
        }
        if request.window.is_empty() {
            return Err(GraphError::EmptySegment);
        }
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let handle = SegmentHandle::new(id);
        self.shared
            .submissions
            .push(Voice::new(handle, request))
            .map_err(|_| GraphError::Saturated)?;
        Ok(handle)
    }

    fn stop(&self, handle: SegmentHandle) {
        if self.shared.stops.push(handle).is_err() {
            tracing::warn!(%handle, "stop queue full, segment plays to its end");
        }
    }

    fn on_completion(&self, handle: SegmentHandle, callback: CompletionCallback) {
        let unknown = handle.id() == 0 || handle.id() > self.shared.next_id.load(Ordering::Relaxed);
        let mut registry = self.shared.registry.lock();
        if unknown || registry.finished.remove(&handle) {
            drop(registry);
            callback(handle);
            return;
        }
        registry.callbacks.entry(handle).or_default().push(callback);
    }
}

/// Opens the default output device and starts mixing.
///
/// The returned [`Stream`] must be kept alive for as long as audio should
/// play; dropping it silences the graph.
pub fn start_realtime() -> Result<(Stream, CpalGraph), GraphError> {
    let host = cpal::default_host();
    let device = host.default_output_device().ok_or(GraphError::NoDevice)?;
    let supported = device
        .default_output_config()
        .map_err(|err| GraphError::Device(err.to_string()))?;
    let stream_config: StreamConfig = supported.config();
    let sample_rate = stream_config.sample_rate.0;
    let channels = stream_config.channels.max(1) as usize;
    let block_frames = match supported.buffer_size() {
        SupportedBufferSize::Range { max, .. } => (*max as usize).clamp(1, MAX_BLOCK_FRAMES),
        SupportedBufferSize::Unknown => DEFAULT_BLOCK_FRAMES,
    };

    let shared = Arc::new(RealtimeShared::new(sample_rate, channels));
    let (retired_tx, retired_rx) = bounded(RETIRE_CAPACITY);
    let notifier = spawn_notifier(Arc::clone(&shared), retired_rx)?;
    let mixer = RealtimeMixer::new(Arc::clone(&shared), block_frames, retired_tx);

    let stream = match supported.sample_format() {
        SampleFormat::F32 => build_output_stream::<f32>(&device, &stream_config, mixer),
        SampleFormat::I16 => build_output_stream::<i16>(&device, &stream_config, mixer),
        SampleFormat::U16 => build_output_stream::<u16>(&device, &stream_config, mixer),
        other => Err(GraphError::UnsupportedFormat(format!("{other:?}"))),
    };

    let mut graph = CpalGraph {
        shared,
        notifier: Some(notifier),
    };
    let stream = match stream {
        Ok(stream) => stream,
        Err(err) => {
            graph.halt();
            return Err(err);
        }
    };
    if let Err(err) = stream.play() {
        graph.halt();
        return Err(GraphError::Device(err.to_string()));
    }

    tracing::info!(sample_rate, channels, block_frames, "realtime output graph started");
    Ok((stream, graph))
}

fn spawn_notifier(
    shared: Arc<RealtimeShared>,
    retired: Receiver<Voice>,
) -> Result<JoinHandle<()>, GraphError> {
    thread::Builder::new()
        .name("retrograde-completion".into())
        .spawn(move || {
            while shared.running.load(Ordering::Relaxed) {
                let handle = match retired.recv_timeout(NOTIFIER_POLL) {
                    Ok(voice) => voice.handle,
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                };
                let callbacks = {
                    let mut registry = shared.registry.lock();
                    match registry.callbacks.remove(&handle) {
                        Some(callbacks) => callbacks,
                        None => {
                            registry.finished.insert(handle);
                            Vec::new()
                        }
                    }
                };
                for callback in callbacks {
                    callback(handle);
                }
            }
        })
        .map_err(|err| GraphError::Device(format!("failed to spawn notifier thread: {err}")))
}

/// State owned by the output callback. Everything it needs is allocated up
/// front; finished voices are handed to the notifier thread to be freed.
struct RealtimeMixer {
    shared: Arc<RealtimeShared>,
    voices: Vec<Voice>,
    scratch: Vec<f32>,
    retired: Sender<Voice>,
}

impl RealtimeMixer {
    fn new(shared: Arc<RealtimeShared>, block_frames: usize, retired: Sender<Voice>) -> Self {
        let channels = shared.channels.max(1);
        Self {
            voices: Vec::with_capacity(VOICE_CAPACITY),
            scratch: vec![0.0; block_frames.max(1) * channels],
            retired,
            shared,
        }
    }

    fn render<T>(&mut self, output: &mut [T])
    where
        T: Sample + FromSample<f32>,
    {
        let shared = &*self.shared;
        if !shared.running.load(Ordering::Relaxed) {
            output.fill(T::from_sample(0.0f32));
            return;
        }

        let channels = shared.channels.max(1);
        let rate = shared.sample_rate.max(1) as f64;
        let frames = output.len() / channels;
        let block_start_frame = shared.frames_rendered.load(Ordering::Acquire);
        let block_start = block_start_frame as f64 / rate;
        let block_end = (block_start_frame + frames as u64) as f64 / rate;

        while self.voices.len() < VOICE_CAPACITY {
            match shared.submissions.pop() {
                Some(voice) => self.voices.push(voice),
                None => break,
            }
        }
        while let Some(handle) = shared.stops.pop() {
            if let Some(voice) = self.voices.iter_mut().find(|voice| voice.handle == handle) {
                voice.truncate(block_start);
            }
        }

        let mut chunk_start_frame = block_start_frame;
        for chunk in output.chunks_mut(self.scratch.len()) {
            let mix = &mut self.scratch[..chunk.len()];
            mix.fill(0.0);
            let chunk_start = chunk_start_frame as f64 / rate;
            for voice in &self.voices {
                voice.mix_interleaved(mix, channels, chunk_start, rate);
            }
            for (sample, value) in chunk.iter_mut().zip(mix.iter()) {
                *sample = T::from_sample(*value);
            }
            chunk_start_frame += (chunk.len() / channels) as u64;
        }

        shared
            .frames_rendered
            .fetch_add(frames as u64, Ordering::Release);
        self.retire(block_end);
    }

    /// Moves voices finished by `time` to the notifier. A full channel
    /// leaves them in place for the next block.
    fn retire(&mut self, time: f64) {
        let mut index = 0;
        while index < self.voices.len() {
            if !self.voices[index].is_finished_at(time) {
                index += 1;
                continue;
            }
            let voice = self.voices.swap_remove(index);
            match self.retired.try_send(voice) {
                Ok(()) => {}
                Err(TrySendError::Full(voice)) | Err(TrySendError::Disconnected(voice)) => {
                    self.voices.push(voice);
                    return;
                }
            }
        }
    }
}

fn build_output_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut mixer: RealtimeMixer,
) -> Result<Stream, GraphError>
where
    T: Sample + SizedSample + FromSample<f32> + Send + 'static,
{
    device
        .build_output_stream(
            config,
            move |output: &mut [T], _info| mixer.render(output),
            move |err| {
                tracing::error!(?err, "cpal output stream error");
            },
            None,
        )
        .map_err(|err| GraphError::Device(err.to_string()))
}
