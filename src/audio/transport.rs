//! Voice transport adapters.
//!
//! The frame pump hands exactly one [`Frame`] per tick to a
//! [`VoiceTransport`]. The songbird adapter forwards those frames through a
//! bounded channel into a live raw-PCM input that the songbird driver mixes,
//! Opus-encodes and sends.

use bytes::Bytes;
use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError};
use songbird::input::{Input, RawAdapter};
use std::io::{self, Read, Seek, SeekFrom};
use symphonia::core::io::MediaSource;
use tracing::debug;

use super::frame::{Frame, FrameEncoding, CHANNELS, SAMPLE_RATE};
use crate::error::TransportError;

/// Real-time sink polled once per 20 ms tick.
pub trait VoiceTransport: Send {
    /// Payload encoding this transport expects; the pump never transcodes.
    fn encoding(&self) -> FrameEncoding;

    /// Whether a frame can be taken right now.
    fn can_provide(&self) -> bool;

    /// Takes one frame (audio or silence). Must not block.
    fn provide_frame(&mut self, frame: Frame) -> Result<(), TransportError>;
}

/// Sending half living in the frame pump.
pub struct SongbirdTransport {
    tx: Sender<Frame>,
}

impl SongbirdTransport {
    /// Creates the pump-side transport and the songbird-side stream.
    ///
    /// `buffer_frames` bounds how far the pump may run ahead of the driver.
    pub fn channel(buffer_frames: usize) -> (Self, FrameStream) {
        let (tx, rx) = crossbeam_channel::bounded(buffer_frames.max(1));
        (
            Self { tx },
            FrameStream {
                rx,
                current: Bytes::new(),
            },
        )
    }
}

impl VoiceTransport for SongbirdTransport {
    fn encoding(&self) -> FrameEncoding {
        FrameEncoding::PcmF32Le
    }

    fn can_provide(&self) -> bool {
        !self.tx.is_full()
    }

    fn provide_frame(&mut self, frame: Frame) -> Result<(), TransportError> {
        self.tx.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => TransportError::Backlogged,
            TrySendError::Disconnected(_) => TransportError::Closed,
        })
    }
}

/// Endless byte stream of interleaved f32 PCM read by the songbird driver.
///
/// Reads never block: songbird mixes several calls on one thread, so when
/// the pump has not delivered yet a silent frame is read instead. The stream
/// ends when the pump side is dropped.
pub struct FrameStream {
    rx: Receiver<Frame>,
    current: Bytes,
}

impl FrameStream {
    /// Envuelve el stream como input de songbird (48 kHz estéreo f32)
    pub fn into_input(self) -> Input {
        debug!("🎧 Creando input en vivo para songbird");
        Input::from(RawAdapter::new(self, SAMPLE_RATE, CHANNELS as u32))
    }
}

impl Read for FrameStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        if self.current.is_empty() {
            self.current = match self.rx.try_recv() {
                Ok(frame) => frame.into_payload(),
                Err(TryRecvError::Empty) => Frame::silence().into_payload(),
                Err(TryRecvError::Disconnected) => return Ok(0),
            };
        }

        let n = buf.len().min(self.current.len());
        let chunk = self.current.split_to(n);
        buf[..n].copy_from_slice(&chunk);
        Ok(n)
    }
}

impl Seek for FrameStream {
    fn seek(&mut self, _pos: SeekFrom) -> io::Result<u64> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "el stream de voz en vivo no admite seek",
        ))
    }
}

impl MediaSource for FrameStream {
    fn is_seekable(&self) -> bool {
        false
    }

    fn byte_len(&self) -> Option<u64> {
        None
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use parking_lot::Mutex;
    use std::sync::Arc;

    use super::*;

    /// Transport that records every frame it is given.
    #[derive(Clone, Default)]
    pub(crate) struct RecordingTransport {
        pub(crate) frames: Arc<Mutex<Vec<Frame>>>,
    }

    impl RecordingTransport {
        pub(crate) fn audio_flags(&self) -> Vec<bool> {
            self.frames.lock().iter().map(Frame::has_audio).collect()
        }
    }

    impl VoiceTransport for RecordingTransport {
        fn encoding(&self) -> FrameEncoding {
            FrameEncoding::PcmF32Le
        }

        fn can_provide(&self) -> bool {
            true
        }

        fn provide_frame(&mut self, frame: Frame) -> Result<(), TransportError> {
            self.frames.lock().push(frame);
            Ok(())
        }
    }
}
