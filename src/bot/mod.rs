//! # Bot Module
//!
//! Discord front-end of the reader.
//!
//! This module contains:
//! - Command registration and handling (`/join`, `/leave`, `/skip`, `/help`)
//! - Text triggers (`!join`, `!leave`) and message forwarding to the relay
//! - Voice connection management through songbird
//! - Voice driver events that keep each session's transport flag current
//!
//! ## Architecture
//!
//! [`OpenVoiceBot`] implements Serenity's [`EventHandler`]. Every chat message
//! is handed to the [`TtsRelay`], which owns the per-guild sessions. Joining a
//! voice channel wires a [`SongbirdTransport`] into a live songbird input so
//! the session's frame pump can feed the call.

use anyhow::Result;
use dashmap::DashMap;
use serenity::{
    all::{
        ActivityData, ChannelId, Context, EventHandler, GuildId, Interaction, Message, Ready,
        VoiceState,
    },
    async_trait,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub mod commands;
pub mod events;
pub mod handlers;
pub mod reporter;

use crate::{
    audio::transport::SongbirdTransport,
    config::Config,
    relay::{IncomingMessage, TtsRelay},
};

/// Main Discord handler of the reader bot.
///
/// ## Fields
///
/// - `config`: Bot configuration (token, TTS engine, buffers)
/// - `relay`: Synthesis-to-playback bridge owning the guild sessions
/// - `voice_handlers`: Per-guild songbird calls
pub struct OpenVoiceBot {
    config: Arc<Config>,
    relay: Arc<TtsRelay>,
    voice_handlers: DashMap<GuildId, Arc<tokio::sync::Mutex<songbird::Call>>>,
}

impl OpenVoiceBot {
    pub fn new(config: Arc<Config>, relay: Arc<TtsRelay>) -> Self {
        Self {
            config,
            relay,
            voice_handlers: DashMap::new(),
        }
    }

    pub fn relay(&self) -> &Arc<TtsRelay> {
        &self.relay
    }

    /// Registers slash commands with Discord.
    ///
    /// Guild commands (`GUILD_ID` set) propagate in about a second; global
    /// commands can take up to an hour.
    async fn register_commands(&self, ctx: &Context) -> Result<()> {
        info!("📝 Registrando comandos slash...");

        match self.config.guild_id {
            Some(guild_id) => {
                let guild_id = GuildId::new(guild_id);

                if !ctx.cache.guilds().contains(&guild_id) {
                    warn!("⚠️ El bot no está en la guild especificada: {}", guild_id);
                    return Ok(());
                }

                commands::register_guild_commands(ctx, guild_id)
                    .await
                    .map_err(|e| {
                        error!("❌ Error registrando comandos de guild: {:?}", e);
                        anyhow::anyhow!("No se pudieron registrar comandos de guild. Verifica que el bot tenga permisos de 'applications.commands' en la guild.")
                    })?;
                info!("✅ Comandos de guild registrados para: {}", guild_id);
            }
            None => {
                commands::register_global_commands(ctx).await.map_err(|e| {
                    error!("❌ Error registrando comandos globales: {:?}", e);
                    anyhow::anyhow!("No se pudieron registrar comandos globales. Verifica que el bot tenga permisos de 'applications.commands'.")
                })?;
                info!("✅ Comandos globales registrados");
            }
        }

        Ok(())
    }

    /// Connects to `voice_channel` and starts reading `text_channel` aloud.
    ///
    /// Joining again in the same guild replaces the previous session.
    ///
    /// # Required Permissions
    ///
    /// - `Connect` - To join the voice channel
    /// - `Speak` - To play audio in the channel
    pub async fn join_voice_channel(
        &self,
        ctx: &Context,
        guild_id: GuildId,
        voice_channel: ChannelId,
        text_channel: ChannelId,
    ) -> Result<()> {
        let manager = songbird::get(ctx)
            .await
            .ok_or_else(|| anyhow::anyhow!("Songbird no inicializado"))?;

        let call = manager.join(guild_id, voice_channel).await.map_err(|e| {
            error!("Error al obtener handler de voz: {:?}", e);
            anyhow::anyhow!("Error al conectar al canal de voz")
        })?;

        let (transport, stream) = SongbirdTransport::channel(self.config.transport_buffer_frames);
        let session = self.relay.on_join(guild_id, text_channel, Box::new(transport));

        {
            let mut handler = call.lock().await;
            handler.stop();
            handler.remove_all_global_events();
            events::register_voice_events(
                &mut handler,
                guild_id,
                self.relay.sessions().clone(),
                session.id(),
            );

            let track = handler.play_input(stream.into_input());
            if let Err(e) = track.set_volume(self.config.default_volume) {
                warn!("⚠️ No se pudo ajustar el volumen en guild {}: {:?}", guild_id, e);
            }
        }

        self.voice_handlers.insert(guild_id, call);
        info!(
            "🔊 Conectado al canal de voz {} en guild {} (leyendo {})",
            voice_channel, guild_id, text_channel
        );
        Ok(())
    }

    /// Disconnects from voice and tears the guild's session down.
    pub async fn leave_voice_channel(&self, ctx: &Context, guild_id: GuildId) -> Result<()> {
        let manager = songbird::get(ctx)
            .await
            .ok_or_else(|| anyhow::anyhow!("Songbird no inicializado"))?;

        self.relay.on_leave(guild_id).await;
        self.voice_handlers.remove(&guild_id);

        if manager.get(guild_id).is_some() {
            manager.remove(guild_id).await?;
        }

        info!("👋 Desconectado del canal de voz en guild {}", guild_id);
        Ok(())
    }

    pub fn get_voice_handler(
        &self,
        guild_id: GuildId,
    ) -> Option<Arc<tokio::sync::Mutex<songbird::Call>>> {
        self.voice_handlers.get(&guild_id).map(|h| h.clone())
    }
}

#[async_trait]
impl EventHandler for OpenVoiceBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());

        if let Err(e) = self.register_commands(&ctx).await {
            error!("Error al registrar comandos: {:?}", e);
        }

        ctx.set_activity(Some(ActivityData::playing("🗣️ leyendo el chat | /join")));
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::Command(command_interaction) = interaction {
            if let Err(e) = handlers::handle_command(&ctx, command_interaction, self).await {
                error!("Error manejando comando: {:?}", e);
            }
        }
    }

    /// Text triggers first; anything else is a candidate for reading aloud.
    async fn message(&self, ctx: Context, msg: Message) {
        if msg.author.bot {
            return;
        }
        let Some(guild_id) = msg.guild_id else {
            return;
        };

        if let Some(command) = handlers::TextCommand::parse(&msg.content) {
            if let Err(e) = handlers::handle_text_command(&ctx, &msg, guild_id, command, self).await {
                error!("Error manejando comando de texto: {:?}", e);
            }
            return;
        }

        let author_in_voice = handlers::get_user_voice_channel(&ctx, guild_id, msg.author.id)
            .await
            .is_ok();

        let submitted = self.relay.submit(IncomingMessage {
            guild_id,
            channel_id: msg.channel_id,
            author_is_bot: msg.author.bot,
            author_in_voice,
            text: msg.content.clone(),
        });

        if submitted.is_some() {
            debug!("🗨️ Mensaje {} de {} enviado a síntesis", msg.id, msg.author.name);
        }
    }

    /// Cleans up when the bot itself loses its voice channel.
    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let current_user_id = ctx.cache.current_user().id;
        if new.user_id != current_user_id || old.is_none() || new.channel_id.is_some() {
            return;
        }

        if let Some(guild_id) = new.guild_id {
            info!("🔌 Bot desconectado en guild {}", guild_id);

            if let Err(e) = self.leave_voice_channel(&ctx, guild_id).await {
                error!("Error limpiando la sesión de voz: {:?}", e);
            }
        }
    }
}
