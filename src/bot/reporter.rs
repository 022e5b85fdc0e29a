use async_trait::async_trait;
use serenity::{
    builder::CreateMessage,
    http::Http,
    model::id::{ChannelId, GuildId},
};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::{relay::PlaybackReporter, ui::embeds};

/// Publica los avisos de reproducción en el canal que se está leyendo.
pub struct ChatReporter {
    http: Arc<Http>,
}

impl ChatReporter {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }

    async fn send(&self, guild_id: GuildId, channel_id: ChannelId, title: &str, description: &str) {
        let message = CreateMessage::new().embed(embeds::create_notice_embed(title, description, false));

        match channel_id.send_message(&self.http, message).await {
            Ok(_) => debug!("📣 Aviso enviado en guild {}: {}", guild_id, title),
            Err(e) => warn!("⚠️ No se pudo avisar en el canal {}: {:?}", channel_id, e),
        }
    }
}

#[async_trait]
impl PlaybackReporter for ChatReporter {
    async fn no_audio_found(&self, guild_id: GuildId, channel_id: ChannelId) {
        self.send(
            guild_id,
            channel_id,
            "❌ Sin audio",
            "No se encontró audio para ese mensaje",
        )
        .await;
    }

    async fn playback_failed(&self, guild_id: GuildId, channel_id: ChannelId) {
        self.send(
            guild_id,
            channel_id,
            "❌ Error de reproducción",
            "No se pudo cargar el audio del mensaje",
        )
        .await;
    }
}
