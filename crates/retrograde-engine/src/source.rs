use std::sync::Arc;

/// Immutable decoded recording shared by every segment cut from it.
///
/// Cloning a `SourceBuffer` only bumps a reference count; the PCM data is
/// never copied per segment.
#[derive(Debug, Clone)]
pub struct SourceBuffer {
    inner: Arc<SourceData>,
}

#[derive(Debug)]
struct SourceData {
    sample_rate: f32,
    frames: usize,
    channels: Vec<Vec<f32>>,
}

impl SourceBuffer {
    /// Builds a buffer from planar channels. Shorter channels are padded with
    /// silence so every channel holds the same number of frames.
    pub fn with_sample_rate(sample_rate: f32, channels: Vec<Vec<f32>>) -> Self {
        let frames = longest_channel(&channels);
        let channels = channels
            .into_iter()
            .map(|mut channel| {
                channel.resize(frames, 0.0);
                channel
            })
            .collect();
        Self {
            inner: Arc::new(SourceData {
                sample_rate: sample_rate.max(0.0),
                frames,
                channels,
            }),
        }
    }

    pub fn sample_rate(&self) -> f32 {
        self.inner.sample_rate
    }

    pub fn channel_count(&self) -> usize {
        self.inner.channels.len()
    }

    pub fn frames(&self) -> usize {
        self.inner.frames
    }

    /// Length of the recording in seconds.
    pub fn duration(&self) -> f64 {
        if self.inner.sample_rate <= 0.0 {
            return 0.0;
        }
        self.inner.frames as f64 / self.inner.sample_rate as f64
    }

    pub fn samples(&self) -> &[Vec<f32>] {
        &self.inner.channels
    }

    pub fn channel(&self, index: usize) -> Option<&[f32]> {
        self.inner
            .channels
            .get(index)
            .map(|channel| channel.as_slice())
    }

    pub fn is_empty(&self) -> bool {
        self.inner.frames == 0 || self.inner.channels.is_empty()
    }

    /// Returns `true` when both handles point at the same decoded data.
    pub fn shares_data_with(&self, other: &SourceBuffer) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Cuts the window `[start, start + duration)` (in seconds) out of the
    /// recording. The window shares the recording's data.
    pub fn window(&self, start: f64, duration: f64) -> SourceWindow {
        let rate = self.inner.sample_rate as f64;
        let start_frame = ((start.max(0.0) * rate).floor() as usize).min(self.inner.frames);
        let frames = ((duration.max(0.0) * rate).floor() as usize)
            .min(self.inner.frames - start_frame);
        SourceWindow {
            source: self.clone(),
            start_frame,
            frames,
        }
    }
}

/// A contiguous range of frames inside a [`SourceBuffer`].
#[derive(Debug, Clone)]
pub struct SourceWindow {
    source: SourceBuffer,
    start_frame: usize,
    frames: usize,
}

impl SourceWindow {
    pub fn source(&self) -> &SourceBuffer {
        &self.source
    }

    pub fn start_frame(&self) -> usize {
        self.start_frame
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn sample_rate(&self) -> f32 {
        self.source.sample_rate()
    }

    pub fn channel_count(&self) -> usize {
        self.source.channel_count()
    }

    pub fn is_empty(&self) -> bool {
        self.frames == 0
    }

    pub fn channel(&self, index: usize) -> Option<&[f32]> {
        self.source
            .channel(index)
            .map(|channel| &channel[self.start_frame..self.start_frame + self.frames])
    }

    /// Reads a sample at a fractional frame offset inside the window using
    /// linear interpolation. Offsets outside the window read as silence.
    pub fn sample_at(&self, channel: usize, position: f64) -> f32 {
        let Some(data) = self.channel(channel) else {
            return 0.0;
        };
        if position < 0.0 || data.is_empty() {
            return 0.0;
        }
        let base = position.floor();
        let index = base as usize;
        if index >= data.len() {
            return 0.0;
        }
        let fraction = (position - base) as f32;
        let a = data[index];
        let b = data.get(index + 1).copied().unwrap_or(a);
        a + (b - a) * fraction
    }
}

fn longest_channel(channels: &[Vec<f32>]) -> usize {
    channels
        .iter()
        .map(|channel| channel.len())
        .max()
        .unwrap_or(0)
}
