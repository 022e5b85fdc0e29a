//! Guild sessions and their registry.
//!
//! A [`GuildSession`] exists while the bot is connected to voice in a guild.
//! It owns that guild's scheduler, reorder buffer and frame pump. The
//! [`SessionRegistry`] is the only cross-guild mutable state: it changes on
//! join/leave and is read on every message.

use dashmap::DashMap;
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId};
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{
    pump::FramePump,
    reorder::{Sequencer, SpeechOrder},
    scheduler::{EnqueueOutcome, OverflowPolicy, PlaybackScheduler},
    track::Track,
    transport::VoiceTransport,
};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Per-session queue limits and ordering.
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub max_pending: usize,
    pub overflow: OverflowPolicy,
    pub order: SpeechOrder,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_pending: 32,
            overflow: OverflowPolicy::DropNewest,
            order: SpeechOrder::Completion,
        }
    }
}

pub struct GuildSession {
    id: u64,
    guild_id: GuildId,
    listening_channel: ChannelId,
    scheduler: Arc<Mutex<PlaybackScheduler>>,
    sequencer: Mutex<Sequencer>,
    connected: AtomicBool,
    cancel: CancellationToken,
}

impl GuildSession {
    /// Distinguishes this session from earlier ones in the same guild
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    /// Canal de texto que se está leyendo
    pub fn listening_channel(&self) -> ChannelId {
        self.listening_channel
    }

    pub fn scheduler(&self) -> &Arc<Mutex<PlaybackScheduler>> {
        &self.scheduler
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn set_connected(&self, connected: bool) {
        let previous = self.connected.swap(connected, Ordering::AcqRel);
        if previous != connected {
            info!(
                "🔌 Transporte de voz en guild {}: {}",
                self.guild_id,
                if connected { "conectado" } else { "desconectado" }
            );
        }
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Reserves a playback slot for a message about to be synthesised
    pub fn reserve_slot(&self) -> u64 {
        self.sequencer.lock().reserve()
    }

    /// Hands a finished synthesis to the queue, honouring the speech order.
    ///
    /// `None` releases the slot without enqueuing anything. Lock order is
    /// sequencer then scheduler; the sequencer stays held until the released
    /// tracks are enqueued.
    pub fn complete_slot(&self, ticket: u64, track: Option<Track>) -> Vec<EnqueueOutcome> {
        let mut sequencer = self.sequencer.lock();
        let ready = sequencer.complete(ticket, track);
        if ready.is_empty() {
            return Vec::new();
        }

        let mut scheduler = self.scheduler.lock();
        ready.into_iter().map(|t| scheduler.enqueue(t)).collect()
    }

    fn close(&self) -> usize {
        self.cancel.cancel();
        self.connected.store(false, Ordering::Release);
        self.scheduler.lock().clear()
    }
}

/// Guild id -> live session.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<GuildId, Arc<GuildSession>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a session and starts its frame pump. An existing session for
    /// the guild is closed in the same map operation that replaces it.
    ///
    /// Must be called from inside the tokio runtime.
    pub fn create(
        &self,
        guild_id: GuildId,
        listening_channel: ChannelId,
        transport: Box<dyn VoiceTransport>,
        settings: SessionSettings,
    ) -> Arc<GuildSession> {
        let scheduler = Arc::new(Mutex::new(PlaybackScheduler::new(
            guild_id,
            settings.max_pending,
            settings.overflow,
        )));

        let session = Arc::new(GuildSession {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            guild_id,
            listening_channel,
            scheduler: scheduler.clone(),
            sequencer: Mutex::new(Sequencer::new(settings.order)),
            connected: AtomicBool::new(true),
            cancel: CancellationToken::new(),
        });

        FramePump::new(guild_id, scheduler, transport).spawn(session.cancel.clone());

        if let Some(previous) = self.sessions.insert(guild_id, session.clone()) {
            retire(&previous);
        }
        info!(
            "🎙️ Sesión {} creada en guild {} (leyendo canal {})",
            session.id, guild_id, listening_channel
        );
        session
    }

    pub fn get(&self, guild_id: GuildId) -> Option<Arc<GuildSession>> {
        self.sessions.get(&guild_id).map(|s| s.clone())
    }

    /// Session for the guild only if it is still the one with `session_id`
    pub fn get_current(&self, guild_id: GuildId, session_id: u64) -> Option<Arc<GuildSession>> {
        self.get(guild_id).filter(|s| s.id == session_id)
    }

    /// Stops the pump and discards every queued track. Returns whether a
    /// session existed.
    pub fn destroy(&self, guild_id: GuildId) -> bool {
        match self.sessions.remove(&guild_id) {
            Some((_, session)) => {
                retire(&session);
                true
            }
            None => {
                debug!("No hay sesión que cerrar en guild {}", guild_id);
                false
            }
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

fn retire(session: &GuildSession) {
    let dropped = session.close();
    info!(
        "👋 Sesión {} cerrada en guild {} ({} pistas descartadas)",
        session.id, session.guild_id, dropped
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{
        scheduler::SchedulerState, track::test_support::track_with_frames,
        transport::test_support::RecordingTransport,
    };
    use std::time::Duration;

    fn create(registry: &SessionRegistry, guild: u64) -> Arc<GuildSession> {
        registry.create(
            GuildId::new(guild),
            ChannelId::new(100),
            Box::new(RecordingTransport::default()),
            SessionSettings::default(),
        )
    }

    #[tokio::test]
    async fn test_create_get_destroy() {
        let registry = SessionRegistry::new();
        let session = create(&registry, 1);

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(GuildId::new(1)).map(|s| s.id()), Some(session.id()));
        assert_eq!(session.listening_channel(), ChannelId::new(100));
        assert!(session.is_connected());

        assert!(registry.destroy(GuildId::new(1)));
        assert!(!registry.destroy(GuildId::new(1)));
        assert!(registry.is_empty());
        assert!(session.is_closed());
        assert!(!session.is_connected());
    }

    #[tokio::test]
    async fn test_destroy_discards_queued_tracks() {
        let registry = SessionRegistry::new();
        let session = create(&registry, 1);
        {
            let mut scheduler = session.scheduler().lock();
            scheduler.enqueue(track_with_frames("a", 50));
            scheduler.enqueue(track_with_frames("b", 50));
        }

        registry.destroy(GuildId::new(1));
        let scheduler = session.scheduler().lock();
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        assert_eq!(scheduler.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_recreate_replaces_previous_session() {
        let registry = SessionRegistry::new();
        let first = create(&registry, 1);
        let second = create(&registry, 1);

        assert_ne!(first.id(), second.id());
        assert!(first.is_closed());
        assert!(registry.get_current(GuildId::new(1), first.id()).is_none());
        assert!(registry.get_current(GuildId::new(1), second.id()).is_some());
    }

    #[tokio::test]
    async fn test_sessions_are_independent() {
        let registry = SessionRegistry::new();
        let a = create(&registry, 1);
        let b = create(&registry, 2);

        a.scheduler().lock().enqueue(track_with_frames("a", 5));
        registry.destroy(GuildId::new(1));

        assert!(!b.is_closed());
        assert!(b.scheduler().lock().is_idle());
        assert!(registry.get(GuildId::new(2)).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pump_plays_enqueued_track() {
        let registry = SessionRegistry::new();
        let transport = RecordingTransport::default();
        let session = registry.create(
            GuildId::new(3),
            ChannelId::new(100),
            Box::new(transport.clone()),
            SessionSettings::default(),
        );

        let ticket = session.reserve_slot();
        let outcomes = session.complete_slot(ticket, Some(track_with_frames("hola", 2)));
        assert_eq!(outcomes.len(), 1);

        tokio::time::sleep(Duration::from_millis(100)).await;
        let audio = transport.audio_flags().iter().filter(|a| **a).count();
        assert_eq!(audio, 2);
        assert!(session.scheduler().lock().is_idle());

        registry.destroy(GuildId::new(3));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_creates_leave_one_live_session() {
        let registry = SessionRegistry::new();
        let handle = tokio::runtime::Handle::current();

        for _ in 0..20 {
            let barrier = std::sync::Barrier::new(2);
            let (registry, handle, barrier) = (&registry, &handle, &barrier);
            let created: Vec<Arc<GuildSession>> = std::thread::scope(|scope| {
                let workers: Vec<_> = (0..2)
                    .map(move |_| {
                        scope.spawn(move || {
                            let _runtime = handle.enter();
                            barrier.wait();
                            create(registry, 4)
                        })
                    })
                    .collect();
                workers.into_iter().map(|w| w.join().unwrap()).collect()
            });

            let live = registry.get(GuildId::new(4)).unwrap();
            for session in &created {
                assert_eq!(session.is_closed(), session.id() != live.id());
            }
        }

        registry.destroy(GuildId::new(4));
    }

    #[test]
    fn test_concurrent_completions_keep_message_order() {
        let session = GuildSession {
            id: 0,
            guild_id: GuildId::new(5),
            listening_channel: ChannelId::new(100),
            scheduler: Arc::new(Mutex::new(PlaybackScheduler::new(
                GuildId::new(5),
                64,
                OverflowPolicy::DropNewest,
            ))),
            sequencer: Mutex::new(Sequencer::new(SpeechOrder::Message)),
            connected: AtomicBool::new(true),
            cancel: CancellationToken::new(),
        };

        let slots: Vec<(u64, Track)> = (0..16)
            .map(|i| (session.reserve_slot(), track_with_frames(&format!("m{i}"), 5)))
            .collect();
        let expected: Vec<_> = slots.iter().map(|(_, t)| t.id()).collect();

        let barrier = std::sync::Barrier::new(slots.len());
        std::thread::scope(|scope| {
            for (ticket, track) in slots.into_iter().rev() {
                let (session, barrier) = (&session, &barrier);
                scope.spawn(move || {
                    barrier.wait();
                    session.complete_slot(ticket, Some(track));
                });
            }
        });

        let scheduler = session.scheduler().lock();
        let mut played: Vec<_> = scheduler.active_id().into_iter().collect();
        played.extend(scheduler.pending_ids());
        assert_eq!(played, expected);
    }
}
