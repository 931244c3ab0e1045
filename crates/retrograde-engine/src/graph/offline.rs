use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::time::Duration;

use atomic_float::AtomicF64;
use parking_lot::Mutex;

use super::{
    CompletionCallback, OutputGraph, Pacer, SegmentHandle, SegmentRequest, Voice,
};
use crate::GraphError;

/// Snapshot of a submitted segment, for inspection and tests.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentRecord {
    pub handle: SegmentHandle,
    pub source_start: f64,
    pub duration: f64,
    pub start_time: f64,
    pub stop_time: f64,
    pub fade_in: f64,
    pub fade_out: f64,
    pub stopped_early: bool,
}

struct Entry {
    voice: Voice,
    finished: bool,
    stopped_early: bool,
}

#[derive(Default)]
struct OfflineState {
    next_id: u64,
    entries: Vec<Entry>,
    callbacks: HashMap<SegmentHandle, Vec<CompletionCallback>>,
}

/// Output graph driven by a virtual clock.
///
/// Pausing through the graph's [`Pacer`] implementation advances the clock
/// instead of sleeping, so a complete reverse run renders as fast as the CPU
/// allows and always produces the same schedule.
pub struct OfflineGraph {
    sample_rate: u32,
    channels: usize,
    clock: AtomicF64,
    state: Mutex<OfflineState>,
}

impl OfflineGraph {
    pub fn new(sample_rate: u32, channels: usize) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            channels: channels.max(1),
            clock: AtomicF64::new(0.0),
            state: Mutex::new(OfflineState::default()),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Moves the clock forward and completes every segment whose stop time
    /// has been reached.
    pub fn advance(&self, seconds: f64) {
        let step = seconds.max(0.0);
        let now = self.clock.fetch_add(step, Ordering::AcqRel) + step;
        let ready = {
            let mut state = self.state.lock();
            let mut finished = Vec::new();
            for entry in state.entries.iter_mut() {
                if !entry.finished && entry.voice.is_finished_at(now) {
                    entry.finished = true;
                    finished.push(entry.voice.handle);
                }
            }
            take_callbacks(&mut state, &finished)
        };
        run_callbacks(ready);
    }

    pub fn records(&self) -> Vec<SegmentRecord> {
        let state = self.state.lock();
        state
            .entries
            .iter()
            .map(|entry| {
                let request = &entry.voice.request;
                SegmentRecord {
                    handle: entry.voice.handle,
                    source_start: request.source_start,
                    duration: request.envelope.duration,
                    start_time: request.start_time,
                    stop_time: request.stop_time,
                    fade_in: request.envelope.fade_in,
                    fade_out: request.envelope.fade_out,
                    stopped_early: entry.stopped_early,
                }
            })
            .collect()
    }

    pub fn submitted_count(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Number of segments that have neither finished nor been stopped.
    pub fn playing_count(&self) -> usize {
        self.state
            .lock()
            .entries
            .iter()
            .filter(|entry| !entry.finished)
            .count()
    }

    /// Mixes every submitted segment into planar channels covering the output
    /// clock from zero to the last stop time.
    pub fn render(&self) -> Vec<Vec<f32>> {
        let state = self.state.lock();
        let end = state
            .entries
            .iter()
            .map(|entry| entry.voice.request.stop_time)
            .fold(0.0f64, f64::max);
        let rate = self.sample_rate as f64;
        let frames = (end * rate).ceil() as usize;
        let mut output = vec![vec![0.0f32; frames]; self.channels];
        for entry in &state.entries {
            entry.voice.mix_into(&mut output, 0.0, rate);
        }
        output
    }
}

impl OutputGraph for OfflineGraph {
    fn now(&self) -> f64 {
        self.clock.load(Ordering::Acquire)
    }

    fn submit(&self, request: SegmentRequest) -> Result<SegmentHandle, GraphError> {
        if request.window.is_empty() {
            return Err(GraphError::EmptySegment);
        }
        let mut state = self.state.lock();
        state.next_id += 1;
        let handle = SegmentHandle::new(state.next_id);
        state.entries.push(Entry {
            voice: Voice::new(handle, request),
            finished: false,
            stopped_early: false,
        });
        Ok(handle)
    }

    fn stop(&self, handle: SegmentHandle) {
        let now = self.now();
        let ready = {
            let mut state = self.state.lock();
            let Some(entry) = state
                .entries
                .iter_mut()
                .find(|entry| entry.voice.handle == handle)
            else {
                tracing::debug!(%handle, "stop requested for unknown segment");
                return;
            };
            if entry.finished {
                return;
            }
            entry.voice.truncate(now);
            entry.finished = true;
            entry.stopped_early = true;
            take_callbacks(&mut state, &[handle])
        };
        run_callbacks(ready);
    }

    fn on_completion(&self, handle: SegmentHandle, callback: CompletionCallback) {
        let mut state = self.state.lock();
        let finished = state
            .entries
            .iter()
            .find(|entry| entry.voice.handle == handle)
            .map_or(true, |entry| entry.finished);
        if finished {
            drop(state);
            callback(handle);
            return;
        }
        state.callbacks.entry(handle).or_default().push(callback);
    }
}

impl Pacer for OfflineGraph {
    fn pause(&self, duration: Duration) {
        self.advance(duration.as_secs_f64());
    }
}

fn take_callbacks(
    state: &mut OfflineState,
    handles: &[SegmentHandle],
) -> Vec<(SegmentHandle, CompletionCallback)> {
    let mut ready = Vec::new();
    for handle in handles {
        if let Some(callbacks) = state.callbacks.remove(handle) {
            ready.extend(callbacks.into_iter().map(|callback| (*handle, callback)));
        }
    }
    ready
}

fn run_callbacks(ready: Vec<(SegmentHandle, CompletionCallback)>) {
    for (handle, callback) in ready {
        callback(handle);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    use super::*;
    use crate::envelope::SegmentEnvelope;
    use crate::SourceBuffer;

    fn request(start_time: f64) -> SegmentRequest {
        let source = SourceBuffer::with_sample_rate(100.0, vec![vec![0.5; 400]]);
        SegmentRequest::new(
            source.window(1.0, 1.0),
            1.0,
            start_time,
            SegmentEnvelope::compute(1.0, 1.0, 1.0, 0.0),
        )
    }

    #[test]
    fn completes_segments_as_clock_advances() {
        let graph = OfflineGraph::new(100, 1);
        let handle = graph.submit(request(0.0)).expect("submit");
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        graph.on_completion(
            handle,
            Box::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        graph.advance(0.5);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        graph.advance(0.5);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(graph.playing_count(), 0);
    }

    #[test]
    fn stop_is_idempotent() {
        let graph = OfflineGraph::new(100, 1);
        let handle = graph.submit(request(0.0)).expect("submit");
        graph.advance(0.25);
        graph.stop(handle);
        graph.stop(handle);
        graph.stop(SegmentHandle::new(99));
        let records = graph.records();
        assert!(records[0].stopped_early);
        assert!((records[0].stop_time - 0.25).abs() < 1e-12);
    }

    #[test]
    fn late_registration_fires_immediately() {
        let graph = OfflineGraph::new(100, 1);
        let handle = graph.submit(request(0.0)).expect("submit");
        graph.advance(2.0);
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        graph.on_completion(
            handle,
            Box::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn renders_mixed_output() {
        let graph = OfflineGraph::new(100, 2);
        graph.submit(request(0.0)).expect("submit");
        graph.submit(request(0.5)).expect("submit");
        let output = graph.render();
        assert_eq!(output.len(), 2);
        assert_eq!(output[0].len(), 150);
        assert!((output[0][25] - 0.5).abs() < 1e-6);
        assert!((output[0][75] - 1.0).abs() < 1e-6);
        assert!((output[1][125] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn rejects_empty_windows() {
        let graph = OfflineGraph::new(100, 1);
        let source = SourceBuffer::with_sample_rate(100.0, vec![vec![0.5; 10]]);
        let request = SegmentRequest::new(
            source.window(5.0, 1.0),
            5.0,
            0.0,
            SegmentEnvelope::compute(1.0, 1.0, 1.0, 0.0),
        );
        assert!(matches!(graph.submit(request), Err(GraphError::EmptySegment)));
    }
}
