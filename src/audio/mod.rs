//! # Audio Module
//!
//! Real-time playback core of the reader.
//!
//! ## Architecture
//!
//! ### [`decoder`] - Frame Decoder
//! - Turns one synthesized clip (WAV, compressed containers or raw PCM) into
//!   a lazy sequence of 20 ms [`frame::Frame`]s
//! - Resamples to 48 kHz stereo
//!
//! ### [`track`] - Tracks
//! - One utterance with its lifecycle state and an optional read-ahead
//!   decode worker
//!
//! ### [`scheduler`] - Guild Playback Scheduler
//! - Strict FIFO: one active track, bounded pending queue, never stalls on a
//!   failed track
//!
//! ### [`pump`] - Frame Pump
//! - One frame per 20 ms tick to the guild's [`transport::VoiceTransport`],
//!   silence when idle
//!
//! ### [`session`] - Guild Sessions
//! - Per-guild scheduler, [`reorder`] buffer and pump, looked up through a
//!   concurrent registry
//!
//! ## Audio Format
//!
//! - **Sample Rate**: 48kHz (Discord standard)
//! - **Samples**: interleaved `f32`, little-endian
//! - **Channels**: Stereo (2 channels)
//! - **Encoding**: Opus, done by the songbird driver

pub mod decoder;
pub mod frame;
pub mod pump;
pub mod reorder;
pub mod scheduler;
pub mod session;
pub mod track;
pub mod transport;
