use super::{SegmentHandle, SegmentRequest};

/// A scheduled segment as seen by a mixer: it knows how to add itself into
/// an output block given the block's position on the output clock.
#[derive(Debug, Clone)]
pub struct Voice {
    pub handle: SegmentHandle,
    pub request: SegmentRequest,
}

impl Voice {
    pub fn new(handle: SegmentHandle, request: SegmentRequest) -> Self {
        Self { handle, request }
    }

    /// Cuts the voice at `time` if that is earlier than its scheduled stop.
    pub fn truncate(&mut self, time: f64) {
        if time < self.request.stop_time {
            self.request.stop_time = time.max(self.request.start_time);
        }
    }

    pub fn is_finished_at(&self, time: f64) -> bool {
        time >= self.request.stop_time
    }

    /// Mixes the voice into planar `output` starting at output-clock time
    /// `block_start`, at `output_rate` frames per second. Source channels map
    /// onto output channels by index; a mono source feeds every channel.
    pub fn mix_into(&self, output: &mut [Vec<f32>], block_start: f64, output_rate: f64) {
        let frames = output.iter().map(Vec::len).max().unwrap_or(0);
        self.mix_frames(output.len(), frames, block_start, output_rate, |ch, frame, sample| {
            if let Some(slot) = output[ch].get_mut(frame) {
                *slot += sample;
            }
        });
    }

    /// Interleaved variant of [`Voice::mix_into`].
    pub fn mix_interleaved(
        &self,
        output: &mut [f32],
        channels: usize,
        block_start: f64,
        output_rate: f64,
    ) {
        let channels = channels.max(1);
        let frames = output.len() / channels;
        self.mix_frames(channels, frames, block_start, output_rate, |ch, frame, sample| {
            output[frame * channels + ch] += sample;
        });
    }

    fn mix_frames<F>(
        &self,
        out_channels: usize,
        frames: usize,
        block_start: f64,
        output_rate: f64,
        mut write: F,
    ) where
        F: FnMut(usize, usize, f32),
    {
        if output_rate <= 0.0 || out_channels == 0 || frames == 0 {
            return;
        }
        let request = &self.request;
        let block_end = block_start + frames as f64 / output_rate;
        if block_end <= request.start_time || block_start >= request.stop_time {
            return;
        }

        let window = &request.window;
        let source_rate = window.sample_rate() as f64;
        let source_channels = window.channel_count();
        if source_channels == 0 {
            return;
        }

        let first = ((request.start_time - block_start) * output_rate).ceil().max(0.0) as usize;
        for frame in first..frames {
            let time = block_start + frame as f64 / output_rate;
            if time >= request.stop_time {
                break;
            }
            let local = time - request.start_time;
            if local < 0.0 {
                continue;
            }
            let gain = request.gain.value_at(local);
            if gain == 0.0 {
                continue;
            }
            let position = local * source_rate;
            for ch in 0..out_channels {
                let source_ch = if source_channels == 1 { 0 } else { ch };
                if source_ch >= source_channels {
                    continue;
                }
                write(ch, frame, window.sample_at(source_ch, position) * gain);
            }
        }
    }
}
