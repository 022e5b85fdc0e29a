use serenity::{async_trait, model::id::GuildId};
use songbird::{
    events::CoreEvent, Event as VoiceEvent, EventContext, EventHandler as VoiceEventHandler,
};
use std::sync::Arc;
use tracing::{info, warn};

use crate::audio::session::SessionRegistry;

/// Keeps a session's transport flag in sync with the songbird driver.
///
/// Events from an earlier session in the same guild are ignored.
pub struct DriverStateHandler {
    pub guild_id: GuildId,
    pub sessions: Arc<SessionRegistry>,
    pub session_id: u64,
}

#[async_trait]
impl VoiceEventHandler for DriverStateHandler {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<VoiceEvent> {
        let session = self.sessions.get_current(self.guild_id, self.session_id)?;

        match ctx {
            EventContext::DriverConnect(_) => {
                info!("🔗 Conectado al driver de voz en guild {}", self.guild_id);
                session.set_connected(true);
            }
            EventContext::DriverReconnect(_) => {
                info!("🔄 Reconectado al canal de voz en guild {}", self.guild_id);
                session.set_connected(true);
            }
            EventContext::DriverDisconnect(data) => {
                warn!(
                    "🔌 Driver de voz desconectado en guild {}: {:?}",
                    self.guild_id, data.reason
                );
                session.set_connected(false);
            }
            _ => {}
        }

        None
    }
}

/// Registra los handlers del driver para la sesión actual
pub fn register_voice_events(
    handler: &mut songbird::Call,
    guild_id: GuildId,
    sessions: Arc<SessionRegistry>,
    session_id: u64,
) {
    for event in [
        CoreEvent::DriverConnect,
        CoreEvent::DriverReconnect,
        CoreEvent::DriverDisconnect,
    ] {
        handler.add_global_event(
            VoiceEvent::Core(event),
            DriverStateHandler {
                guild_id,
                sessions: sessions.clone(),
                session_id,
            },
        );
    }
}
