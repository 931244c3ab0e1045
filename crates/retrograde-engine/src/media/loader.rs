use std::fs::File;
use std::io::Cursor;
use std::path::Path;

use symphonia::core::audio::{AudioBufferRef, SampleBuffer, Signal};
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::SourceBuffer;

const FALLBACK_SAMPLE_RATE: u32 = 48_000;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Symphonia(#[from] SymphoniaError),
    #[error(transparent)]
    Hound(#[from] hound::Error),
    #[error("no supported audio tracks found in source")]
    NoSupportedTracks,
    #[error("source decoded to zero frames")]
    Empty,
}

/// Turns encoded bytes into a [`SourceBuffer`]. The scheduler only ever sees
/// the decoded result.
pub trait SourceDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<SourceBuffer, DecodeError>;
}

/// Default decoder backed by symphonia.
#[derive(Default, Debug, Clone, Copy)]
pub struct MediaDecoder;

impl MediaDecoder {
    pub fn new() -> Self {
        Self
    }

    pub fn decode_path<P: AsRef<Path>>(&self, path: P) -> Result<SourceBuffer, DecodeError> {
        let file = File::open(path.as_ref())?;
        self.decode_reader(file, Some(path.as_ref()))
    }

    pub fn decode_reader<R>(
        &self,
        reader: R,
        hint_path: Option<&Path>,
    ) -> Result<SourceBuffer, DecodeError>
    where
        R: MediaSource + 'static,
    {
        let mss = MediaSourceStream::new(Box::new(reader), Default::default());
        let mut hint = Hint::new();
        if let Some(ext) = hint_path
            .and_then(|path| path.extension())
            .and_then(|ext| ext.to_str())
        {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe().format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )?;

        let mut format = probed.format;
        let (codec_params, track_id) = {
            let track = format
                .default_track()
                .ok_or(DecodeError::NoSupportedTracks)?;
            (track.codec_params.clone(), track.id)
        };

        let mut decoder =
            symphonia::default::get_codecs().make(&codec_params, &DecoderOptions::default())?;

        let mut sample_rate = codec_params.sample_rate.unwrap_or(FALLBACK_SAMPLE_RATE);
        let mut channel_data: Vec<Vec<f32>> = codec_params
            .channels
            .map(|channels| vec![Vec::new(); channels.count()])
            .unwrap_or_default();
        let mut sample_buffer: Option<SampleBuffer<f32>> = None;

        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(ref err))
                    if err.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break
                }
                Err(SymphoniaError::ResetRequired) => break,
                Err(err) => return Err(err.into()),
            };
            if packet.track_id() != track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(err)) => {
                    tracing::warn!("skipping undecodable packet: {err}");
                    continue;
                }
                Err(err) => return Err(err.into()),
            };

            let spec = *decoded.spec();
            sample_rate = spec.rate;
            let channel_count = spec.channels.count();
            if channel_count == 0 {
                continue;
            }
            if channel_data.len() != channel_count {
                channel_data.resize(channel_count, Vec::new());
            }

            match decoded {
                AudioBufferRef::F32(buffer) => {
                    for (index, channel) in channel_data.iter_mut().enumerate() {
                        channel.extend_from_slice(buffer.chan(index));
                    }
                }
                other => {
                    let capacity = other.capacity();
                    let too_small = sample_buffer
                        .as_ref()
                        .map_or(true, |buf| buf.capacity() < capacity * channel_count);
                    if too_small {
                        sample_buffer = Some(SampleBuffer::<f32>::new(capacity as u64, spec));
                    }
                    let Some(buf) = sample_buffer.as_mut() else {
                        continue;
                    };
                    buf.copy_interleaved_ref(other);
                    let samples = buf.samples();
                    for (index, channel) in channel_data.iter_mut().enumerate() {
                        channel.extend(samples[index..].iter().step_by(channel_count).copied());
                    }
                }
            }
        }

        let source = SourceBuffer::with_sample_rate(sample_rate as f32, channel_data);
        if source.is_empty() {
            return Err(DecodeError::Empty);
        }
        tracing::debug!(
            sample_rate,
            channels = source.channel_count(),
            frames = source.frames(),
            "decoded source"
        );
        Ok(source)
    }
}

impl SourceDecoder for MediaDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<SourceBuffer, DecodeError> {
        self.decode_reader(Cursor::new(bytes.to_vec()), None)
    }
}

/// Writes planar channels as a 32-bit float WAV file.
pub fn write_wav<P: AsRef<Path>>(
    path: P,
    sample_rate: u32,
    channels: &[Vec<f32>],
) -> Result<(), DecodeError> {
    let mut writer = hound::WavWriter::create(
        path,
        hound::WavSpec {
            channels: channels.len().max(1) as u16,
            sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        },
    )?;

    let frames = channels.iter().map(Vec::len).max().unwrap_or(0);
    for frame in 0..frames {
        if channels.is_empty() {
            writer.write_sample(0.0f32)?;
            continue;
        }
        for channel in channels {
            writer.write_sample(channel.get(frame).copied().unwrap_or(0.0))?;
        }
    }
    writer.finalize()?;
    Ok(())
}
