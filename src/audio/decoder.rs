//! Frame decoder
//!
//! Turns one audio clip (container bytes or headerless PCM) into a lazy,
//! finite sequence of 20 ms [`Frame`]s at 48 kHz stereo.
//!
//! - Containers are probed and decoded with symphonia.
//! - Headerless signed 16-bit little-endian PCM is read directly.
//! - Any other sample rate is converted with rubato.
//!
//! Decoding is pull-based and has no real-time constraint; pacing belongs to
//! the frame pump.

use bytes::Bytes;
use rubato::{FastFixedIn, PolynomialDegree, Resampler as RubatoResampler};
use std::{collections::VecDeque, io::Cursor};
use symphonia::core::{
    audio::SampleBuffer,
    codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL},
    errors::Error as SymphoniaError,
    formats::{FormatOptions, FormatReader},
    io::MediaSourceStream,
    meta::MetadataOptions,
    probe::Hint,
};
use tracing::{debug, trace};

use super::frame::{Frame, CHANNELS, FRAME_VALUES, SAMPLE_RATE};
use crate::error::DecodeError;

/// Sample-frames read per raw PCM chunk
const RAW_CHUNK_FRAMES: usize = 1024;
/// Input chunk size for the resampler
const RESAMPLE_CHUNK: usize = 1024;

/// How the clip bytes should be interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClipFormat {
    /// Container/codec detected by probing, with an optional extension hint
    Probe { extension: Option<String> },
    /// Headerless interleaved `i16` little-endian samples
    RawPcm { sample_rate: u32, channels: u16 },
}

impl ClipFormat {
    /// Formato que devuelve el motor de síntesis
    pub fn wav() -> Self {
        Self::Probe {
            extension: Some("wav".to_string()),
        }
    }
}

struct Chunk {
    samples: Vec<f32>,
    rate: u32,
    channels: usize,
}

enum Backend {
    Symphonia {
        reader: Box<dyn FormatReader>,
        decoder: Box<dyn Decoder>,
        track_id: u32,
    },
    RawPcm {
        data: Bytes,
        offset: usize,
        sample_rate: u32,
        channels: usize,
    },
}

impl Backend {
    fn open(data: &Bytes, format: &ClipFormat) -> Result<Self, DecodeError> {
        match format {
            ClipFormat::Probe { extension } => {
                let mss = MediaSourceStream::new(Box::new(Cursor::new(data.clone())), Default::default());

                let mut hint = Hint::new();
                if let Some(ext) = extension {
                    hint.with_extension(ext);
                }

                let probed = symphonia::default::get_probe()
                    .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
                    .map_err(|e| DecodeError::Probe(e.to_string()))?;

                let reader = probed.format;
                let track = reader
                    .tracks()
                    .iter()
                    .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
                    .ok_or(DecodeError::NoAudioTrack)?;

                let track_id = track.id;
                let decoder = symphonia::default::get_codecs()
                    .make(&track.codec_params, &DecoderOptions::default())
                    .map_err(|e| DecodeError::UnsupportedCodec(e.to_string()))?;

                Ok(Self::Symphonia {
                    reader,
                    decoder,
                    track_id,
                })
            }
            ClipFormat::RawPcm {
                sample_rate,
                channels,
            } => {
                if *sample_rate == 0 || *channels == 0 {
                    return Err(DecodeError::InvalidFormat(format!(
                        "sample_rate={} channels={}",
                        sample_rate, channels
                    )));
                }

                Ok(Self::RawPcm {
                    data: data.clone(),
                    offset: 0,
                    sample_rate: *sample_rate,
                    channels: *channels as usize,
                })
            }
        }
    }

    /// Next block of interleaved samples, `None` at end of stream.
    fn next_chunk(&mut self) -> Result<Option<Chunk>, DecodeError> {
        match self {
            Self::Symphonia {
                reader,
                decoder,
                track_id,
            } => loop {
                let packet = match reader.next_packet() {
                    Ok(packet) => packet,
                    Err(SymphoniaError::IoError(ref e))
                        if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                    {
                        return Ok(None);
                    }
                    Err(SymphoniaError::ResetRequired) => return Ok(None),
                    Err(e) => return Err(DecodeError::Packet(e.to_string())),
                };

                if packet.track_id() != *track_id {
                    continue;
                }

                let decoded = decoder
                    .decode(&packet)
                    .map_err(|e| DecodeError::Packet(e.to_string()))?;

                if decoded.frames() == 0 {
                    continue;
                }

                let spec = *decoded.spec();
                let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                buffer.copy_interleaved_ref(decoded);

                return Ok(Some(Chunk {
                    samples: buffer.samples().to_vec(),
                    rate: spec.rate,
                    channels: spec.channels.count(),
                }));
            },
            Self::RawPcm {
                data,
                offset,
                sample_rate,
                channels,
            } => {
                let frame_bytes = *channels * 2;
                let remaining = data.len() - *offset;

                if remaining == 0 {
                    return Ok(None);
                }
                if remaining < frame_bytes {
                    *offset = data.len();
                    return Err(DecodeError::Truncated(remaining));
                }

                let take = (remaining / frame_bytes).min(RAW_CHUNK_FRAMES) * frame_bytes;
                let samples = data[*offset..*offset + take]
                    .chunks_exact(2)
                    .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0)
                    .collect();
                *offset += take;

                Ok(Some(Chunk {
                    samples,
                    rate: *sample_rate,
                    channels: *channels,
                }))
            }
        }
    }
}

/// Streaming wrapper around rubato for fixed-size input chunks.
struct StreamResampler {
    inner: FastFixedIn<f32>,
    input: Vec<Vec<f32>>,
}

impl StreamResampler {
    fn new(from_rate: u32) -> Result<Self, DecodeError> {
        let inner = FastFixedIn::<f32>::new(
            SAMPLE_RATE as f64 / from_rate as f64,
            1.0,
            PolynomialDegree::Septic,
            RESAMPLE_CHUNK,
            CHANNELS,
        )
        .map_err(|e| DecodeError::Resample(e.to_string()))?;

        Ok(Self {
            inner,
            input: vec![Vec::with_capacity(RESAMPLE_CHUNK * 2); CHANNELS],
        })
    }

    fn push(&mut self, stereo: &[f32], out: &mut VecDeque<f32>) -> Result<(), DecodeError> {
        for pair in stereo.chunks_exact(CHANNELS) {
            for (channel, sample) in self.input.iter_mut().zip(pair) {
                channel.push(*sample);
            }
        }

        while self.input[0].len() >= self.inner.input_frames_next() {
            let needed = self.inner.input_frames_next();
            let chunk: Vec<Vec<f32>> = self
                .input
                .iter_mut()
                .map(|channel| channel.drain(..needed).collect())
                .collect();

            let output = self
                .inner
                .process(&chunk, None)
                .map_err(|e| DecodeError::Resample(e.to_string()))?;
            interleave_into(&output, out);
        }

        Ok(())
    }

    fn finish(&mut self, out: &mut VecDeque<f32>) -> Result<(), DecodeError> {
        if self.input[0].is_empty() {
            return Ok(());
        }

        let rest: Vec<Vec<f32>> = self.input.iter_mut().map(std::mem::take).collect();
        let output = self
            .inner
            .process_partial(Some(rest.as_slice()), None)
            .map_err(|e| DecodeError::Resample(e.to_string()))?;
        interleave_into(&output, out);

        Ok(())
    }
}

fn interleave_into(planar: &[Vec<f32>], out: &mut VecDeque<f32>) {
    let frames = planar.first().map_or(0, Vec::len);
    for i in 0..frames {
        for channel in planar {
            out.push_back(channel[i]);
        }
    }
}

/// Mono is duplicated, extra channels beyond the first two are dropped.
fn to_stereo(samples: &[f32], channels: usize) -> Vec<f32> {
    match channels {
        2 => samples.to_vec(),
        1 => samples.iter().flat_map(|s| [*s, *s]).collect(),
        n => samples
            .chunks_exact(n)
            .flat_map(|frame| [frame[0], frame[1]])
            .collect(),
    }
}

/// Lazy decoder from one clip to transport frames.
pub struct FrameDecoder {
    data: Bytes,
    format: ClipFormat,
    backend: Backend,
    resampler: Option<StreamResampler>,
    pending: VecDeque<f32>,
    exhausted: bool,
    frames_out: u64,
}

impl FrameDecoder {
    /// Abre el clip; falla si el formato no es decodificable
    pub fn open(data: Bytes, format: ClipFormat) -> Result<Self, DecodeError> {
        let backend = Backend::open(&data, &format)?;
        debug!("🎚️ Decodificador abierto ({} bytes, {:?})", data.len(), format);

        Ok(Self {
            data,
            format,
            backend,
            resampler: None,
            pending: VecDeque::with_capacity(FRAME_VALUES * 4),
            exhausted: false,
            frames_out: 0,
        })
    }

    /// Pulls the next frame.
    ///
    /// `Ok(None)` means the clip ended normally. The final partial frame is
    /// padded with silence.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, DecodeError> {
        while self.pending.len() < FRAME_VALUES && !self.exhausted {
            if let Err(e) = self.decode_more() {
                self.exhausted = true;
                self.pending.clear();
                return Err(e);
            }
        }

        if self.pending.is_empty() {
            return Ok(None);
        }

        let take = FRAME_VALUES.min(self.pending.len());
        let mut samples: Vec<f32> = self.pending.drain(..take).collect();
        samples.resize(FRAME_VALUES, 0.0);

        self.frames_out += 1;
        trace!("Frame {} decodificado", self.frames_out);
        Ok(Some(Frame::from_samples(&samples)))
    }

    /// Starts the clip over from its first frame.
    pub fn rewind(&mut self) -> Result<(), DecodeError> {
        self.backend = Backend::open(&self.data, &self.format)?;
        self.resampler = None;
        self.pending.clear();
        self.exhausted = false;
        self.frames_out = 0;
        Ok(())
    }

    pub fn frames_decoded(&self) -> u64 {
        self.frames_out
    }

    fn decode_more(&mut self) -> Result<(), DecodeError> {
        let Some(chunk) = self.backend.next_chunk()? else {
            self.exhausted = true;
            if let Some(resampler) = self.resampler.as_mut() {
                resampler.finish(&mut self.pending)?;
            }
            return Ok(());
        };

        if chunk.channels == 0 {
            return Err(DecodeError::InvalidFormat("0 canales".to_string()));
        }

        let stereo = to_stereo(&chunk.samples, chunk.channels);

        if chunk.rate == SAMPLE_RATE && self.resampler.is_none() {
            self.pending.extend(stereo);
            return Ok(());
        }

        if self.resampler.is_none() {
            debug!("🔁 Remuestreando {}Hz -> {}Hz", chunk.rate, SAMPLE_RATE);
            self.resampler = Some(StreamResampler::new(chunk.rate)?);
        }
        if let Some(resampler) = self.resampler.as_mut() {
            resampler.push(&stereo, &mut self.pending)?;
        }

        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::{pcm_clip, wav_clip};
    use super::*;

    fn raw_stereo_48k() -> ClipFormat {
        ClipFormat::RawPcm {
            sample_rate: SAMPLE_RATE,
            channels: 2,
        }
    }

    fn drain(decoder: &mut FrameDecoder) -> Result<usize, DecodeError> {
        let mut count = 0;
        while decoder.next_frame()?.is_some() {
            count += 1;
        }
        Ok(count)
    }

    #[test]
    fn test_raw_pcm_yields_exact_frame_count() {
        let mut decoder = FrameDecoder::open(pcm_clip(3), raw_stereo_48k()).unwrap();

        for _ in 0..3 {
            let frame = decoder.next_frame().unwrap().expect("frame");
            assert!(frame.has_audio());
        }
        assert!(decoder.next_frame().unwrap().is_none());
        assert!(decoder.next_frame().unwrap().is_none());
        assert_eq!(decoder.frames_decoded(), 3);
    }

    #[test]
    fn test_partial_tail_is_padded() {
        let mut data = pcm_clip(1).to_vec();
        // 100 sample-frames more than one frame
        data.extend(std::iter::repeat(0x10).take(100 * 4));

        let mut decoder = FrameDecoder::open(Bytes::from(data), raw_stereo_48k()).unwrap();
        assert_eq!(drain(&mut decoder).unwrap(), 2);
    }

    #[test]
    fn test_truncated_raw_pcm_fails_after_good_frames() {
        let mut data = pcm_clip(2).to_vec();
        data.push(0x01);

        let mut decoder = FrameDecoder::open(Bytes::from(data), raw_stereo_48k()).unwrap();
        assert!(decoder.next_frame().unwrap().is_some());
        assert!(decoder.next_frame().unwrap().is_some());
        assert!(matches!(decoder.next_frame(), Err(DecodeError::Truncated(1))));
    }

    #[test]
    fn test_mono_raw_pcm_is_duplicated_to_stereo() {
        let format = ClipFormat::RawPcm {
            sample_rate: SAMPLE_RATE,
            channels: 1,
        };
        let mut data = Vec::new();
        for _ in 0..960 {
            data.extend_from_slice(&16384i16.to_le_bytes());
        }

        let mut decoder = FrameDecoder::open(Bytes::from(data), format).unwrap();
        let frame = decoder.next_frame().unwrap().unwrap();
        let left = f32::from_le_bytes(frame.payload()[0..4].try_into().unwrap());
        let right = f32::from_le_bytes(frame.payload()[4..8].try_into().unwrap());
        assert_eq!(left, 0.5);
        assert_eq!(right, 0.5);
        assert!(decoder.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_wav_is_resampled_to_48k() {
        // 500 ms a 24 kHz -> ~25 frames de 20 ms
        let mut decoder = FrameDecoder::open(wav_clip(24_000, 500), ClipFormat::wav()).unwrap();
        let frames = drain(&mut decoder).unwrap();
        assert!((24..=26).contains(&frames), "got {} frames", frames);
    }

    #[test]
    fn test_wav_at_48k_passes_through() {
        let mut decoder = FrameDecoder::open(wav_clip(48_000, 100), ClipFormat::wav()).unwrap();
        assert_eq!(drain(&mut decoder).unwrap(), 5);
    }

    #[test]
    fn test_garbage_fails_to_open() {
        let garbage = Bytes::from(b"definitely not audio ".repeat(64));
        assert!(FrameDecoder::open(garbage, ClipFormat::Probe { extension: None }).is_err());
    }

    #[test]
    fn test_truncated_header_fails_to_open() {
        let wav = wav_clip(24_000, 100);
        let truncated = wav.slice(0..10);
        assert!(FrameDecoder::open(truncated, ClipFormat::wav()).is_err());
    }

    #[test]
    fn test_invalid_raw_parameters_rejected() {
        let format = ClipFormat::RawPcm {
            sample_rate: 0,
            channels: 2,
        };
        assert!(matches!(
            FrameDecoder::open(pcm_clip(1), format),
            Err(DecodeError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_rewind_restarts_sequence() {
        let mut decoder = FrameDecoder::open(pcm_clip(2), raw_stereo_48k()).unwrap();
        let first = decoder.next_frame().unwrap().unwrap();
        assert_eq!(drain(&mut decoder).unwrap(), 1);

        decoder.rewind().unwrap();
        assert_eq!(decoder.next_frame().unwrap().unwrap(), first);
        assert_eq!(drain(&mut decoder).unwrap(), 1);
    }
}
