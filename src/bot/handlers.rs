use anyhow::Result;
use serenity::{
    builder::{CreateInteractionResponse, CreateInteractionResponseMessage},
    model::{
        application::CommandInteraction,
        channel::Message,
        id::{ChannelId, GuildId, UserId},
    },
    prelude::Context,
};
use tracing::info;

use crate::{audio::scheduler::Advance, bot::OpenVoiceBot, ui::embeds};

/// Comandos escritos en el chat
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextCommand {
    Join,
    Leave,
}

impl TextCommand {
    pub fn parse(content: &str) -> Option<Self> {
        match content.trim() {
            "!join" => Some(Self::Join),
            "!leave" => Some(Self::Leave),
            _ => None,
        }
    }
}

/// Maneja comandos slash
pub async fn handle_command(
    ctx: &Context,
    command: CommandInteraction,
    bot: &OpenVoiceBot,
) -> Result<()> {
    let guild_id = command
        .guild_id
        .ok_or_else(|| anyhow::anyhow!("Comando usado fuera de un servidor"))?;

    info!(
        "📝 Comando /{} usado por {} en guild {}",
        command.data.name, command.user.name, guild_id
    );

    let reply = match command.data.name.as_str() {
        "join" => join(ctx, bot, guild_id, command.user.id, command.channel_id).await,
        "leave" => leave(ctx, bot, guild_id).await,
        "skip" => skip(bot, guild_id),
        "help" => return handle_help(ctx, &command).await,
        _ => "❌ Comando no reconocido".to_string(),
    };

    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new()
                    .content(reply)
                    .ephemeral(true),
            ),
        )
        .await?;

    Ok(())
}

/// Maneja `!join` y `!leave`
pub async fn handle_text_command(
    ctx: &Context,
    msg: &Message,
    guild_id: GuildId,
    command: TextCommand,
    bot: &OpenVoiceBot,
) -> Result<()> {
    info!("📝 Comando {:?} usado por {} en guild {}", command, msg.author.name, guild_id);

    let reply = match command {
        TextCommand::Join => join(ctx, bot, guild_id, msg.author.id, msg.channel_id).await,
        TextCommand::Leave => leave(ctx, bot, guild_id).await,
    };

    msg.channel_id.say(&ctx.http, reply).await?;
    Ok(())
}

async fn join(
    ctx: &Context,
    bot: &OpenVoiceBot,
    guild_id: GuildId,
    user_id: UserId,
    text_channel: ChannelId,
) -> String {
    let voice_channel = match get_user_voice_channel(ctx, guild_id, user_id).await {
        Ok(channel) => channel,
        Err(e) => return format!("❌ {}", e),
    };

    match bot
        .join_voice_channel(ctx, guild_id, voice_channel, text_channel)
        .await
    {
        Ok(()) => format!("🔊 Conectado a <#{}>, leyendo <#{}>", voice_channel, text_channel),
        Err(e) => format!("❌ {}", e),
    }
}

async fn leave(ctx: &Context, bot: &OpenVoiceBot, guild_id: GuildId) -> String {
    if bot.relay().session(guild_id).is_none() && bot.get_voice_handler(guild_id).is_none() {
        return "❌ No estoy en un canal de voz".to_string();
    }

    match bot.leave_voice_channel(ctx, guild_id).await {
        Ok(()) => "👋 Desconectado del canal de voz".to_string(),
        Err(e) => format!("❌ {}", e),
    }
}

fn skip(bot: &OpenVoiceBot, guild_id: GuildId) -> String {
    let Some(session) = bot.relay().session(guild_id) else {
        return "❌ No estoy en un canal de voz".to_string();
    };

    let advance = session.scheduler().lock().skip();
    match advance {
        Advance::Idle | Advance::Ignored => "🤐 No hay nada que saltar".to_string(),
        Advance::Started(_) => "⏭️ Saltado, leyendo el siguiente mensaje".to_string(),
        Advance::Cleared => "⏭️ Saltado".to_string(),
    }
}

async fn handle_help(ctx: &Context, command: &CommandInteraction) -> Result<()> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new()
                    .embed(embeds::create_help_embed())
                    .ephemeral(true),
            ),
        )
        .await?;

    Ok(())
}

pub async fn get_user_voice_channel(
    ctx: &Context,
    guild_id: GuildId,
    user_id: UserId,
) -> Result<ChannelId> {
    let guild = guild_id
        .to_guild_cached(&ctx.cache)
        .ok_or_else(|| anyhow::anyhow!("Guild no encontrada en caché"))?;

    let channel_id = guild
        .voice_states
        .get(&user_id)
        .and_then(|voice_state| voice_state.channel_id)
        .ok_or_else(|| anyhow::anyhow!("Debes estar en un canal de voz"))?;

    Ok(channel_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_command_parsing() {
        assert_eq!(TextCommand::parse("!join"), Some(TextCommand::Join));
        assert_eq!(TextCommand::parse("  !leave \n"), Some(TextCommand::Leave));
        assert_eq!(TextCommand::parse("!join ahora"), None);
        assert_eq!(TextCommand::parse("hola"), None);
    }
}
