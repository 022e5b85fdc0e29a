use anyhow::Result;
use serenity::{http::Http, model::gateway::GatewayIntents, Client};
use songbird::SerenityInit;
use std::sync::Arc;
use tracing::{error, info, warn};

mod audio;
mod bot;
mod config;
mod error;
mod relay;
mod sources;
mod ui;

use crate::bot::{reporter::ChatReporter, OpenVoiceBot};
use crate::config::Config;
use crate::relay::TtsRelay;
use crate::sources::{ClipArchive, VoicevoxClient};

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("open_voice=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🗣️ Iniciando Open Voice v{}", env!("CARGO_PKG_VERSION"));

    // Cargar configuración
    let config = Arc::new(Config::load()?);
    info!("{}", config.summary());

    let voicevox = VoicevoxClient::new(&config.tts_base_url, config.tts_timeout())?;

    // Manejar health check si es necesario
    if std::env::args().any(|arg| arg == "--health-check") {
        return health_check(&voicevox).await;
    }

    if let Err(e) = voicevox.version().await {
        warn!(
            "⚠️ El motor de voz en {} no responde todavía: {}",
            config.tts_base_url, e
        );
    }

    // Configurar intents mínimos necesarios
    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_VOICE_STATES
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT;

    let reporter = Arc::new(ChatReporter::new(Arc::new(Http::new(&config.discord_token))));
    let archive = config.clip_dir.clone().map(ClipArchive::new);
    let relay = Arc::new(TtsRelay::new(
        Arc::new(voicevox),
        archive,
        reporter,
        config.relay_settings(),
    ));

    // Crear handler del bot
    let handler = OpenVoiceBot::new(config.clone(), relay);

    // Construir cliente
    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .register_songbird()
        .await?;

    // Manejar shutdown graceful
    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Error al registrar Ctrl+C: {:?}", e);
            return;
        }
        info!("⚠️ Señal de shutdown recibida, cerrando...");
        shard_manager.shutdown_all().await;
    });

    // Iniciar bot
    info!("🚀 Bot iniciado exitosamente");
    if let Err(why) = client.start().await {
        error!("Error al ejecutar cliente: {:?}", why);
    }

    Ok(())
}

async fn health_check(voicevox: &VoicevoxClient) -> Result<()> {
    match voicevox.version().await {
        Ok(_) => {
            println!("OK");
            Ok(())
        }
        Err(e) => anyhow::bail!("Motor de voz no disponible: {}", e),
    }
}
