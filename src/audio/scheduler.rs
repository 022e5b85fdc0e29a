use serde::{Deserialize, Serialize};
use serenity::model::id::GuildId;
use std::{collections::VecDeque, str::FromStr};
use tracing::{debug, info, warn};

use super::track::{Track, TrackEndReason, TrackId, TrackState};

/// What to do when a clip arrives and the pending queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowPolicy {
    /// Discard the incoming clip
    DropNewest,
    /// Discard the oldest pending clip and append the incoming one
    DropOldest,
}

impl FromStr for OverflowPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "drop-newest" | "newest" => Ok(Self::DropNewest),
            "drop-oldest" | "oldest" => Ok(Self::DropOldest),
            other => anyhow::bail!("Política de desbordamiento desconocida: {}", other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Nothing was playing; the track is active now
    Started(TrackId),
    /// Appended behind the active track (1-based position in the pending queue)
    Queued { id: TrackId, position: usize },
    /// Queue full; the given track was discarded
    Dropped(TrackId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    Started(TrackId),
    Idle,
    Cleared,
    /// End notification for a track that is not active
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Playing(TrackId),
}

/// Summary of a track that reached a terminal state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinishedTrack {
    pub id: TrackId,
    pub label: String,
    pub state: TrackState,
    pub frames: u64,
}

impl From<&Track> for FinishedTrack {
    fn from(track: &Track) -> Self {
        Self {
            id: track.id(),
            label: track.label().to_string(),
            state: track.state(),
            frames: track.position(),
        }
    }
}

/// FIFO playback queue of one guild.
///
/// At most one track is active; the rest wait in insertion order. Every end
/// notification either activates the next track or leaves the scheduler idle.
#[derive(Debug)]
pub struct PlaybackScheduler {
    guild_id: GuildId,
    active: Option<Track>,
    pending: VecDeque<Track>,
    max_pending: usize,
    overflow: OverflowPolicy,
    history: VecDeque<FinishedTrack>,
    max_history: usize,
}

impl PlaybackScheduler {
    pub fn new(guild_id: GuildId, max_pending: usize, overflow: OverflowPolicy) -> Self {
        Self {
            guild_id,
            active: None,
            pending: VecDeque::new(),
            max_pending: max_pending.max(1),
            overflow,
            history: VecDeque::new(),
            max_history: 50,
        }
    }

    /// Agrega una pista; si no hay nada sonando empieza de inmediato
    pub fn enqueue(&mut self, mut track: Track) -> EnqueueOutcome {
        let id = track.id();

        if self.active.is_none() {
            track.activate();
            self.active = Some(track);
            info!("🔊 Reproduciendo pista {} en guild {}", id, self.guild_id);
            return EnqueueOutcome::Started(id);
        }

        if self.pending.len() >= self.max_pending {
            match self.overflow {
                OverflowPolicy::DropNewest => {
                    warn!(
                        "🚫 Cola llena en guild {} (máximo {}), descartando pista {}",
                        self.guild_id, self.max_pending, id
                    );
                    track.finish(TrackEndReason::Stopped);
                    self.add_to_history(&track);
                    return EnqueueOutcome::Dropped(id);
                }
                OverflowPolicy::DropOldest => {
                    if let Some(mut oldest) = self.pending.pop_front() {
                        warn!(
                            "🚫 Cola llena en guild {}, descartando la pista más antigua {}",
                            self.guild_id,
                            oldest.id()
                        );
                        oldest.finish(TrackEndReason::Stopped);
                        self.add_to_history(&oldest);
                    }
                }
            }
        }

        self.pending.push_back(track);
        let position = self.pending.len();
        debug!("➕ Pista {} en cola (posición {}) guild {}", id, position, self.guild_id);
        EnqueueOutcome::Queued { id, position }
    }

    /// Called once per track when it stops producing frames.
    pub fn on_track_end(&mut self, id: TrackId, reason: TrackEndReason) -> Advance {
        match self.active.take() {
            Some(mut track) if track.id() == id => {
                track.finish(reason);
                debug!(
                    "⏹️ Pista {} terminó ({:?}) tras {} frames",
                    id,
                    reason,
                    track.position()
                );
                self.add_to_history(&track);
            }
            other => {
                self.active = other;
                warn!("Fin de pista {} ignorado: no es la pista activa", id);
                return Advance::Ignored;
            }
        }

        if reason.may_start_next() {
            self.start_next()
        } else {
            self.clear();
            Advance::Cleared
        }
    }

    /// Termina la pista actual y pasa a la siguiente
    pub fn skip(&mut self) -> Advance {
        match self.active_id() {
            Some(id) => self.on_track_end(id, TrackEndReason::Stopped),
            None => Advance::Idle,
        }
    }

    /// Drops the active track and everything pending. Idempotent.
    pub fn clear(&mut self) -> usize {
        let mut cleared = self.pending.len();

        if let Some(mut track) = self.active.take() {
            track.finish(TrackEndReason::Cleanup);
            self.add_to_history(&track);
            cleared += 1;
        }
        self.pending.clear();

        if cleared > 0 {
            info!("🗑️ Cola limpiada en guild {}: {} pistas", self.guild_id, cleared);
        }
        cleared
    }

    pub fn active_mut(&mut self) -> Option<&mut Track> {
        self.active.as_mut()
    }

    pub fn active_id(&self) -> Option<TrackId> {
        self.active.as_ref().map(Track::id)
    }

    pub fn state(&self) -> SchedulerState {
        match self.active_id() {
            Some(id) => SchedulerState::Playing(id),
            None => SchedulerState::Idle,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.active.is_none()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn max_pending(&self) -> usize {
        self.max_pending
    }

    pub fn pending_ids(&self) -> Vec<TrackId> {
        self.pending.iter().map(Track::id).collect()
    }

    /// Most recent finished tracks, oldest first
    pub fn history(&self) -> impl Iterator<Item = &FinishedTrack> {
        self.history.iter()
    }

    fn start_next(&mut self) -> Advance {
        debug_assert!(self.active.is_none());

        match self.pending.pop_front() {
            Some(mut next) => {
                let id = next.id();
                next.activate();
                self.active = Some(next);
                info!("➡️ Siguiente pista {} en guild {}", id, self.guild_id);
                Advance::Started(id)
            }
            None => {
                debug!("📭 Cola vacía en guild {}", self.guild_id);
                Advance::Idle
            }
        }
    }

    fn add_to_history(&mut self, track: &Track) {
        self.history.push_back(FinishedTrack::from(track));

        if self.history.len() > self.max_history {
            self.history.pop_front();
        }
    }
}
