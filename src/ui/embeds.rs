use serenity::{
    all::Timestamp,
    builder::{CreateEmbed, CreateEmbedFooter},
};

/// Paleta de colores estandarizada para el bot
pub mod colors {
    use serenity::all::Colour;

    pub const SUCCESS_GREEN: Colour = Colour::from_rgb(67, 181, 129);
    pub const ERROR_RED: Colour = Colour::from_rgb(220, 53, 69);
    pub const INFO_BLUE: Colour = Colour::from_rgb(52, 144, 220);
}

/// Footer estandarizado para todos los embeds
const STANDARD_FOOTER: &str = "🗣️ Open Voice";

pub fn create_help_embed() -> CreateEmbed {
    CreateEmbed::default()
        .title("🗣️ Open Voice - Guía")
        .color(colors::INFO_BLUE)
        .description("Lee en voz alta los mensajes de un canal de texto")
        .field(
            "🔊 Conexión",
            "• `/join` o `!join` - Entra a tu canal de voz y lee este canal\n\
            • `/leave` o `!leave` - Sale del canal de voz",
            false,
        )
        .field(
            "📜 Lectura",
            "• `/skip` - Salta el mensaje que se está leyendo\n\
            • Solo se leen mensajes de usuarios que están en un canal de voz",
            false,
        )
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
        .timestamp(Timestamp::now())
}

/// Aviso enviado al canal que se está leyendo
pub fn create_notice_embed(title: &str, description: &str, success: bool) -> CreateEmbed {
    CreateEmbed::default()
        .title(title)
        .description(description)
        .color(if success {
            colors::SUCCESS_GREEN
        } else {
            colors::ERROR_RED
        })
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}
