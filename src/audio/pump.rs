use parking_lot::Mutex;
use serenity::model::id::GuildId;
use std::sync::Arc;
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::{
    frame::{Frame, FrameEncoding, FRAME_DURATION},
    scheduler::PlaybackScheduler,
    track::FramePoll,
    transport::VoiceTransport,
};
use crate::error::TransportError;

/// Produces the frame for one tick from the scheduler's active track.
///
/// A track end is reported to the scheduler on the same tick it is
/// observed: with one frame of lookahead when the feed allows it, otherwise
/// on the tick that finds the end (which then yields silence).
pub fn next_frame(scheduler: &mut PlaybackScheduler) -> Frame {
    let Some(track) = scheduler.active_mut() else {
        return Frame::silence();
    };
    let id = track.id();

    match track.next_frame() {
        FramePoll::Ready(frame) => {
            if let Some(reason) = track.peek_end() {
                scheduler.on_track_end(id, reason);
            }
            frame
        }
        FramePoll::Pending => {
            trace!("Buffer vacío en pista {}, enviando silencio", id);
            Frame::silence()
        }
        FramePoll::Ended(reason) => {
            scheduler.on_track_end(id, reason);
            Frame::silence()
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PumpStats {
    pub ticks: u64,
    pub audio_frames: u64,
    pub silent_frames: u64,
    /// Ticks skipped because the transport buffer was full
    pub backlogged: u64,
    pub transport_errors: u64,
}

/// Timer-driven worker delivering one frame per 20 ms to a guild's transport.
pub struct FramePump {
    guild_id: GuildId,
    scheduler: Arc<Mutex<PlaybackScheduler>>,
    transport: Box<dyn VoiceTransport>,
    stats: PumpStats,
    closed_reported: bool,
}

impl FramePump {
    pub fn new(
        guild_id: GuildId,
        scheduler: Arc<Mutex<PlaybackScheduler>>,
        transport: Box<dyn VoiceTransport>,
    ) -> Self {
        let encoding = transport.encoding();
        debug_assert_eq!(encoding, FrameEncoding::PcmF32Le);
        debug!("Pump de guild {} con codificación {:?}", guild_id, encoding);

        Self {
            guild_id,
            scheduler,
            transport,
            stats: PumpStats::default(),
            closed_reported: false,
        }
    }

    /// One pacing step. Never blocks and never fails.
    pub fn tick(&mut self) {
        self.stats.ticks += 1;

        if !self.transport.can_provide() {
            self.stats.backlogged += 1;
            trace!("Transporte saturado en guild {}, tick omitido", self.guild_id);
            return;
        }

        let frame = {
            let mut scheduler = self.scheduler.lock();
            next_frame(&mut scheduler)
        };

        if frame.has_audio() {
            self.stats.audio_frames += 1;
        } else {
            self.stats.silent_frames += 1;
        }

        if let Err(e) = self.transport.provide_frame(frame) {
            self.stats.transport_errors += 1;
            match e {
                TransportError::Closed if !self.closed_reported => {
                    self.closed_reported = true;
                    warn!("🔌 Transporte de voz cerrado en guild {}", self.guild_id);
                }
                _ => trace!("Frame no entregado en guild {}: {}", self.guild_id, e),
            }
        }
    }

    pub fn stats(&self) -> PumpStats {
        self.stats
    }

    /// Ticks every [`FRAME_DURATION`] until `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken) -> PumpStats {
        let mut interval = tokio::time::interval(FRAME_DURATION);
        interval.set_missed_tick_behavior(MissedTickBehavior::Burst);

        info!("⏱️ Pump iniciado en guild {}", self.guild_id);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = interval.tick() => self.tick(),
            }
        }

        info!(
            "⏹️ Pump detenido en guild {} ({} ticks, {} con audio)",
            self.guild_id, self.stats.ticks, self.stats.audio_frames
        );
        self.stats
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<PumpStats> {
        tokio::spawn(self.run(cancel))
    }
}
