//! Synthesis-to-playback bridge.
//!
//! The chat layer drives [`TtsRelay::submit`] for every incoming message and
//! [`TtsRelay::on_join`] / [`TtsRelay::on_leave`] for voice lifecycle. Each
//! eligible message gets its own synthesis task; when it finishes,
//! [`TtsRelay::on_synthesis_complete`] turns the audio into a read-ahead
//! [`Track`] and enqueues it on the guild's scheduler.

use async_trait::async_trait;
use bytes::Bytes;
use serenity::model::id::{ChannelId, GuildId};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{
    audio::{
        decoder::{ClipFormat, FrameDecoder},
        scheduler::EnqueueOutcome,
        session::{GuildSession, SessionRegistry, SessionSettings},
        track::Track,
        transport::VoiceTransport,
    },
    error::{DecodeError, RelayError, SynthesisError},
    sources::{prepare_text, ClipArchive, ClipSource},
};

/// Avisos visibles para el usuario
#[async_trait]
pub trait PlaybackReporter: Send + Sync {
    /// La síntesis no produjo audio
    async fn no_audio_found(&self, guild_id: GuildId, channel_id: ChannelId);

    /// El audio sintetizado no se pudo cargar
    async fn playback_failed(&self, guild_id: GuildId, channel_id: ChannelId);
}

/// Chat message as seen by the relay.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub author_is_bot: bool,
    /// Whether the author is in a voice channel of the guild right now
    pub author_in_voice: bool,
    pub text: String,
}

/// Identifies one in-flight synthesis.
#[derive(Debug, Clone)]
pub struct SynthesisTicket {
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub session_id: u64,
    pub slot: u64,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub speaker: u32,
    pub max_message_chars: usize,
    /// Capacity of each track's decode buffer, in frames
    pub read_ahead_frames: usize,
    pub session: SessionSettings,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            speaker: 0,
            max_message_chars: 200,
            read_ahead_frames: 25,
            session: SessionSettings::default(),
        }
    }
}

pub struct TtsRelay {
    sessions: Arc<SessionRegistry>,
    source: Arc<dyn ClipSource>,
    archive: Option<ClipArchive>,
    reporter: Arc<dyn PlaybackReporter>,
    settings: RelaySettings,
}

impl TtsRelay {
    pub fn new(
        source: Arc<dyn ClipSource>,
        archive: Option<ClipArchive>,
        reporter: Arc<dyn PlaybackReporter>,
        settings: RelaySettings,
    ) -> Self {
        info!(
            "🔧 Relay de voz con fuente {} (voz {}, archivo: {})",
            source.source_name(),
            settings.speaker,
            archive
                .as_ref()
                .map(|a| a.dir().display().to_string())
                .unwrap_or_else(|| "desactivado".to_string())
        );

        Self {
            sessions: Arc::new(SessionRegistry::new()),
            source,
            archive,
            reporter,
            settings,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    pub fn session(&self, guild_id: GuildId) -> Option<Arc<GuildSession>> {
        self.sessions.get(guild_id)
    }

    /// Starts a session reading `listening_channel` into `transport`.
    pub fn on_join(
        &self,
        guild_id: GuildId,
        listening_channel: ChannelId,
        transport: Box<dyn VoiceTransport>,
    ) -> Arc<GuildSession> {
        self.sessions
            .create(guild_id, listening_channel, transport, self.settings.session)
    }

    /// Destroys the guild's session and purges that guild's archived clips.
    ///
    /// In-flight syntheses for the guild complete later as stale.
    pub async fn on_leave(&self, guild_id: GuildId) -> bool {
        let existed = self.sessions.destroy(guild_id);

        if let Some(archive) = &self.archive {
            if let Err(e) = archive.purge(guild_id).await {
                let dir = archive.guild_dir(guild_id);
                warn!("⚠️ No se pudo vaciar {}: {}", dir.display(), e);
            }
        }
        existed
    }

    /// Checks a message and, when eligible, starts its synthesis in the
    /// background. Never blocks the caller on network I/O.
    pub fn submit(self: &Arc<Self>, message: IncomingMessage) -> Option<JoinHandle<()>> {
        let ticket = self.admit(message)?;
        let relay = Arc::clone(self);

        Some(tokio::spawn(async move {
            let result = relay
                .source
                .synthesize(relay.settings.speaker, &ticket.text)
                .await;

            let guild_id = ticket.guild_id;
            match relay.on_synthesis_complete(ticket, result).await {
                Ok(outcomes) => debug!("📥 Clip entregado en guild {}: {:?}", guild_id, outcomes),
                Err(RelayError::StaleSession) => {
                    debug!("🗑️ Clip descartado: la sesión de guild {} ya no existe", guild_id)
                }
                Err(e) => warn!("⚠️ Mensaje no reproducido en guild {}: {}", guild_id, e),
            }
        }))
    }

    /// Eligibility rules plus slot reservation.
    fn admit(&self, message: IncomingMessage) -> Option<SynthesisTicket> {
        if message.author_is_bot {
            return None;
        }

        let session = self.sessions.get(message.guild_id)?;
        if session.listening_channel() != message.channel_id {
            return None;
        }

        if !message.author_in_voice {
            debug!("Autor fuera de voz en guild {}, mensaje ignorado", message.guild_id);
            return None;
        }

        let text = prepare_text(&message.text, self.settings.max_message_chars)?;

        Some(SynthesisTicket {
            guild_id: message.guild_id,
            channel_id: message.channel_id,
            session_id: session.id(),
            slot: session.reserve_slot(),
            text,
        })
    }

    /// Hands a finished synthesis to the guild's scheduler.
    ///
    /// Returns the enqueue outcomes released by this completion (more than
    /// one when message ordering was holding later clips).
    pub async fn on_synthesis_complete(
        &self,
        ticket: SynthesisTicket,
        result: Result<Bytes, SynthesisError>,
    ) -> Result<Vec<EnqueueOutcome>, RelayError> {
        let session = self
            .sessions
            .get_current(ticket.guild_id, ticket.session_id)
            .ok_or(RelayError::StaleSession)?;

        let audio = match result {
            Ok(audio) if audio.is_empty() => Err(SynthesisError::Empty),
            other => other,
        };

        let audio = match audio {
            Ok(audio) => audio,
            Err(e) => {
                session.complete_slot(ticket.slot, None);
                self.reporter
                    .no_audio_found(ticket.guild_id, ticket.channel_id)
                    .await;
                return Err(e.into());
            }
        };

        if !session.is_connected() {
            session.complete_slot(ticket.slot, None);
            return Err(RelayError::TransportUnavailable);
        }

        if let Some(archive) = &self.archive {
            if let Err(e) = archive.store(ticket.guild_id, &audio).await {
                warn!("⚠️ No se pudo archivar el clip: {}", e);
            }
        }

        let decoder = match open_decoder(audio).await {
            Ok(decoder) => decoder,
            Err(e) => {
                session.complete_slot(ticket.slot, None);
                self.reporter
                    .playback_failed(ticket.guild_id, ticket.channel_id)
                    .await;
                return Err(e.into());
            }
        };

        if session.is_closed() {
            return Err(RelayError::StaleSession);
        }

        let track = Track::read_ahead(
            label_for(&ticket.text),
            decoder,
            self.settings.read_ahead_frames,
        );
        let outcomes = session.complete_slot(ticket.slot, Some(track));

        // En orden de mensaje una sola completación puede soltar varios clips
        let dropped: Vec<_> = outcomes
            .iter()
            .filter_map(|o| match o {
                EnqueueOutcome::Dropped(id) => Some(*id),
                _ => None,
            })
            .collect();
        if !dropped.is_empty() {
            warn!(
                "🚫 {} clips descartados por cola llena en guild {}: {:?}",
                dropped.len(),
                ticket.guild_id,
                dropped
            );
            let max = session.scheduler().lock().max_pending();
            return Err(RelayError::QueueFull(max));
        }
        Ok(outcomes)
    }
}

/// Probing and the first packets can take a while; keep them off the runtime.
async fn open_decoder(audio: Bytes) -> Result<FrameDecoder, DecodeError> {
    tokio::task::spawn_blocking(move || FrameDecoder::open(audio, ClipFormat::wav()))
        .await
        .map_err(|_| DecodeError::WorkerGone)?
}

fn label_for(text: &str) -> String {
    const LABEL_CHARS: usize = 32;
    match text.char_indices().nth(LABEL_CHARS) {
        Some((cut, _)) => format!("{}…", &text[..cut]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        audio::{
            decoder::test_support::wav_clip,
            reorder::SpeechOrder,
            scheduler::{OverflowPolicy, SchedulerState},
            transport::test_support::RecordingTransport,
        },
        sources::MockClipSource,
    };
    use mockall::predicate::eq;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    const GUILD: GuildId = GuildId::new(10);
    const CHANNEL: ChannelId = ChannelId::new(20);

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Report {
        NoAudio,
        Failed,
    }

    #[derive(Default)]
    struct RecordingReporter {
        reports: Mutex<Vec<Report>>,
    }

    impl RecordingReporter {
        fn reports(&self) -> Vec<Report> {
            self.reports.lock().clone()
        }
    }

    #[async_trait]
    impl PlaybackReporter for RecordingReporter {
        async fn no_audio_found(&self, _guild_id: GuildId, _channel_id: ChannelId) {
            self.reports.lock().push(Report::NoAudio);
        }

        async fn playback_failed(&self, _guild_id: GuildId, _channel_id: ChannelId) {
            self.reports.lock().push(Report::Failed);
        }
    }

    fn relay_with(
        source: MockClipSource,
        settings: RelaySettings,
    ) -> (Arc<TtsRelay>, Arc<RecordingReporter>) {
        relay_archiving(source, settings, None)
    }

    fn relay_archiving(
        source: MockClipSource,
        settings: RelaySettings,
        archive: Option<ClipArchive>,
    ) -> (Arc<TtsRelay>, Arc<RecordingReporter>) {
        let reporter = Arc::new(RecordingReporter::default());
        let relay = Arc::new(TtsRelay::new(
            Arc::new(source),
            archive,
            reporter.clone(),
            settings,
        ));
        (relay, reporter)
    }

    fn idle_source() -> MockClipSource {
        let mut source = MockClipSource::new();
        source.expect_source_name().return_const("mock");
        source
    }

    fn message(text: &str) -> IncomingMessage {
        IncomingMessage {
            guild_id: GUILD,
            channel_id: CHANNEL,
            author_is_bot: false,
            author_in_voice: true,
            text: text.to_string(),
        }
    }

    fn join(relay: &TtsRelay) -> Arc<GuildSession> {
        relay.on_join(GUILD, CHANNEL, Box::new(RecordingTransport::default()))
    }

    fn ticket(session: &GuildSession, text: &str) -> SynthesisTicket {
        SynthesisTicket {
            guild_id: GUILD,
            channel_id: CHANNEL,
            session_id: session.id(),
            slot: session.reserve_slot(),
            text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn test_ineligible_messages_are_ignored() {
        let (relay, _) = relay_with(idle_source(), RelaySettings::default());

        // Sin sesión
        assert!(relay.submit(message("hola")).is_none());

        join(&relay);
        let mut from_bot = message("hola");
        from_bot.author_is_bot = true;
        assert!(relay.submit(from_bot).is_none());

        let mut other_channel = message("hola");
        other_channel.channel_id = ChannelId::new(99);
        assert!(relay.submit(other_channel).is_none());

        let mut not_in_voice = message("hola");
        not_in_voice.author_in_voice = false;
        assert!(relay.submit(not_in_voice).is_none());

        assert!(relay.submit(message("   ")).is_none());
        relay.on_leave(GUILD).await;
    }

    #[tokio::test]
    async fn test_submit_synthesizes_and_enqueues() {
        let mut source = idle_source();
        source
            .expect_synthesize()
            .with(eq(3), eq("hola"))
            .times(1)
            .returning(|_, _| Ok(wav_clip(24_000, 1000)));

        let settings = RelaySettings {
            speaker: 3,
            ..RelaySettings::default()
        };
        let (relay, reporter) = relay_with(source, settings);
        let session = join(&relay);

        relay.submit(message("  hola ")).unwrap().await.unwrap();

        assert!(matches!(
            session.scheduler().lock().state(),
            SchedulerState::Playing(_)
        ));
        assert!(reporter.reports().is_empty());
        relay.on_leave(GUILD).await;
    }

    #[tokio::test]
    async fn test_synthesis_failure_reports_no_audio() {
        let (relay, reporter) = relay_with(idle_source(), RelaySettings::default());
        let session = join(&relay);

        let result = relay
            .on_synthesis_complete(ticket(&session, "hola"), Err(SynthesisError::Status(500)))
            .await;
        assert!(matches!(result, Err(RelayError::Synthesis(SynthesisError::Status(500)))));

        let empty = relay
            .on_synthesis_complete(ticket(&session, "hola"), Ok(Bytes::new()))
            .await;
        assert!(matches!(empty, Err(RelayError::Synthesis(SynthesisError::Empty))));

        assert_eq!(reporter.reports(), vec![Report::NoAudio, Report::NoAudio]);
        assert!(session.scheduler().lock().is_idle());
        relay.on_leave(GUILD).await;
    }

    #[tokio::test]
    async fn test_undecodable_audio_reports_playback_failure() {
        let (relay, reporter) = relay_with(idle_source(), RelaySettings::default());
        let session = join(&relay);

        let result = relay
            .on_synthesis_complete(
                ticket(&session, "hola"),
                Ok(Bytes::from_static(b"esto no es un wav")),
            )
            .await;

        assert!(matches!(result, Err(RelayError::Decode(_))));
        assert_eq!(reporter.reports(), vec![Report::Failed]);
        assert!(session.scheduler().lock().is_idle());
        relay.on_leave(GUILD).await;
    }

    #[tokio::test]
    async fn test_completion_after_leave_is_discarded() {
        let (relay, reporter) = relay_with(idle_source(), RelaySettings::default());
        let session = join(&relay);
        let pending = ticket(&session, "hola");

        relay.on_leave(GUILD).await;
        // Una sesión nueva no debe recibir el clip de la anterior
        let fresh = join(&relay);

        let result = relay
            .on_synthesis_complete(pending, Ok(wav_clip(24_000, 100)))
            .await;

        assert!(matches!(result, Err(RelayError::StaleSession)));
        assert!(fresh.scheduler().lock().is_idle());
        assert!(reporter.reports().is_empty());
        relay.on_leave(GUILD).await;
    }

    #[tokio::test]
    async fn test_disconnected_transport_discards_clip() {
        let (relay, reporter) = relay_with(idle_source(), RelaySettings::default());
        let session = join(&relay);
        session.set_connected(false);

        let result = relay
            .on_synthesis_complete(ticket(&session, "hola"), Ok(wav_clip(24_000, 100)))
            .await;

        assert!(matches!(result, Err(RelayError::TransportUnavailable)));
        assert!(session.scheduler().lock().is_idle());
        assert!(reporter.reports().is_empty());
        relay.on_leave(GUILD).await;
    }

    #[tokio::test]
    async fn test_full_queue_drops_newest_clip() {
        let settings = RelaySettings {
            session: SessionSettings {
                max_pending: 1,
                overflow: OverflowPolicy::DropNewest,
                order: SpeechOrder::Completion,
            },
            ..RelaySettings::default()
        };
        let (relay, _) = relay_with(idle_source(), settings);
        let session = join(&relay);

        for _ in 0..2 {
            relay
                .on_synthesis_complete(ticket(&session, "uno"), Ok(wav_clip(24_000, 500)))
                .await
                .unwrap();
        }

        let result = relay
            .on_synthesis_complete(ticket(&session, "tres"), Ok(wav_clip(24_000, 500)))
            .await;
        assert!(matches!(result, Err(RelayError::QueueFull(1))));
        assert_eq!(session.scheduler().lock().pending_len(), 1);
        relay.on_leave(GUILD).await;
    }

    #[tokio::test]
    async fn test_message_order_waits_for_earlier_clip() {
        let settings = RelaySettings {
            session: SessionSettings {
                order: SpeechOrder::Message,
                ..SessionSettings::default()
            },
            ..RelaySettings::default()
        };
        let (relay, _) = relay_with(idle_source(), settings);
        let session = join(&relay);

        let first = ticket(&session, "primero");
        let second = ticket(&session, "segundo");

        let early = relay
            .on_synthesis_complete(second, Ok(wav_clip(24_000, 100)))
            .await
            .unwrap();
        assert!(early.is_empty());
        assert!(session.scheduler().lock().is_idle());

        let released = relay
            .on_synthesis_complete(first, Ok(wav_clip(24_000, 100)))
            .await
            .unwrap();
        assert_eq!(released.len(), 2);
        assert!(matches!(released[0], EnqueueOutcome::Started(_)));
        assert!(matches!(released[1], EnqueueOutcome::Queued { position: 1, .. }));
        relay.on_leave(GUILD).await;
    }

    #[tokio::test]
    async fn test_held_clip_dropped_on_release_is_reported() {
        let settings = RelaySettings {
            session: SessionSettings {
                max_pending: 1,
                overflow: OverflowPolicy::DropNewest,
                order: SpeechOrder::Message,
            },
            ..RelaySettings::default()
        };
        let (relay, _) = relay_with(idle_source(), settings);
        let session = join(&relay);

        let first = ticket(&session, "uno");
        let second = ticket(&session, "dos");
        let third = ticket(&session, "tres");

        // "dos" y "tres" esperan a "uno"; al soltarse, "tres" no cabe en la cola
        for held in [third, second] {
            let early = relay
                .on_synthesis_complete(held, Ok(wav_clip(24_000, 500)))
                .await
                .unwrap();
            assert!(early.is_empty());
        }

        let result = relay
            .on_synthesis_complete(first, Ok(wav_clip(24_000, 500)))
            .await;
        assert!(matches!(result, Err(RelayError::QueueFull(1))));
        assert_eq!(session.scheduler().lock().pending_len(), 1);
        relay.on_leave(GUILD).await;
    }

    #[tokio::test]
    async fn test_leave_purges_only_own_guild_clips() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = ClipArchive::new(tmp.path());
        let (relay, _) = relay_archiving(idle_source(), RelaySettings::default(), Some(archive.clone()));
        let other = GuildId::new(11);

        let session = join(&relay);
        let other_session = relay.on_join(other, CHANNEL, Box::new(RecordingTransport::default()));

        relay
            .on_synthesis_complete(ticket(&session, "hola"), Ok(wav_clip(24_000, 100)))
            .await
            .unwrap();
        let other_ticket = SynthesisTicket {
            guild_id: other,
            channel_id: CHANNEL,
            session_id: other_session.id(),
            slot: other_session.reserve_slot(),
            text: "adiós".to_string(),
        };
        relay
            .on_synthesis_complete(other_ticket, Ok(wav_clip(24_000, 100)))
            .await
            .unwrap();

        relay.on_leave(GUILD).await;

        let count = |guild| {
            std::fs::read_dir(archive.guild_dir(guild))
                .map(|d| d.count())
                .unwrap_or(0)
        };
        assert_eq!(count(GUILD), 0);
        assert_eq!(count(other), 1);
        relay.on_leave(other).await;
    }

    #[test]
    fn test_label_is_shortened() {
        assert_eq!(label_for("hola"), "hola");
        let long = "a".repeat(40);
        assert_eq!(label_for(&long).chars().count(), 33);
    }
}
