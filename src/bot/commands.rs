use anyhow::Result;
use serenity::{builder::CreateCommand, model::id::GuildId, prelude::Context};

fn all_commands() -> Vec<CreateCommand> {
    vec![join_command(), leave_command(), skip_command(), help_command()]
}

/// Registra comandos globales
pub async fn register_global_commands(ctx: &Context) -> Result<()> {
    for command in all_commands() {
        ctx.http.create_global_command(&command).await?;
    }

    Ok(())
}

/// Registra comandos para una guild específica (desarrollo)
pub async fn register_guild_commands(ctx: &Context, guild_id: GuildId) -> Result<()> {
    guild_id.set_commands(&ctx.http, all_commands()).await?;

    Ok(())
}

fn join_command() -> CreateCommand {
    CreateCommand::new("join")
        .description("Entra a tu canal de voz y lee este canal de texto")
}

fn leave_command() -> CreateCommand {
    CreateCommand::new("leave").description("Sale del canal de voz y deja de leer")
}

fn skip_command() -> CreateCommand {
    CreateCommand::new("skip").description("Salta el mensaje que se está leyendo")
}

fn help_command() -> CreateCommand {
    CreateCommand::new("help").description("Muestra la ayuda del bot")
}
