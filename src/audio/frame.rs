use bytes::Bytes;
use std::time::Duration;

/// Discord voice sample rate
pub const SAMPLE_RATE: u32 = 48_000;
/// Stereo
pub const CHANNELS: usize = 2;
/// Sample-frames per 20 ms frame at 48 kHz
pub const FRAME_SAMPLES: usize = 960;
/// Interleaved samples per frame (all channels)
pub const FRAME_VALUES: usize = FRAME_SAMPLES * CHANNELS;
/// Payload size of one frame in bytes (f32 LE)
pub const FRAME_BYTES: usize = FRAME_VALUES * std::mem::size_of::<f32>();
/// Real-time duration of one frame
pub const FRAME_DURATION: Duration = Duration::from_millis(20);

static SILENCE: [u8; FRAME_BYTES] = [0; FRAME_BYTES];

/// Encoding a transport expects frame payloads in.
///
/// Transports declare it statically. Payloads are produced in this encoding
/// and never transcoded by the pump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameEncoding {
    /// Interleaved little-endian `f32`, 48 kHz stereo
    PcmF32Le,
}

/// One 20 ms unit of audio handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    payload: Bytes,
    has_audio: bool,
}

impl Frame {
    /// Frame de silencio (sin asignación)
    pub fn silence() -> Self {
        Self {
            payload: Bytes::from_static(&SILENCE),
            has_audio: false,
        }
    }

    /// Builds a frame from exactly [`FRAME_VALUES`] interleaved samples.
    pub fn from_samples(samples: &[f32]) -> Self {
        debug_assert_eq!(samples.len(), FRAME_VALUES);

        let mut payload = Vec::with_capacity(FRAME_BYTES);
        for sample in samples.iter().take(FRAME_VALUES) {
            payload.extend_from_slice(&sample.to_le_bytes());
        }
        payload.resize(FRAME_BYTES, 0);

        Self {
            payload: Bytes::from(payload),
            has_audio: true,
        }
    }

    pub fn has_audio(&self) -> bool {
        self.has_audio
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }
}
