use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

use crate::audio::{
    frame::FRAME_DURATION, reorder::SpeechOrder, scheduler::OverflowPolicy,
    session::SessionSettings,
};
use crate::relay::RelaySettings;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    #[serde(skip_serializing)]
    pub discord_token: String,
    pub guild_id: Option<u64>, // Para comandos de desarrollo

    // Motor de voz
    pub tts_base_url: String,
    pub tts_speaker: u32,
    pub tts_timeout_secs: u64,
    pub max_message_chars: usize,

    // Audio
    pub default_volume: f32,
    pub max_queue_size: usize,
    pub queue_overflow: OverflowPolicy,
    pub read_ahead_ms: u64,
    pub transport_buffer_frames: usize,
    pub speech_order: SpeechOrder,

    // Paths
    pub clip_dir: Option<PathBuf>, // None desactiva el archivo de clips
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self::from_lookup(|key| std::env::var(key).ok())?;

        // Validate configuration before returning
        config.validate()?;

        Ok(config)
    }

    /// Builds the configuration from any key lookup (environment, tests).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let var = |key: &str, default: String| lookup(key).unwrap_or(default);

        Ok(Self {
            // Discord
            discord_token: lookup("DISCORD_TOKEN").context("DISCORD_TOKEN no está definido")?,
            guild_id: lookup("GUILD_ID").and_then(|s| s.trim().parse().ok()),

            // Motor de voz
            tts_base_url: var("TTS_BASE_URL", defaults.tts_base_url),
            tts_speaker: var("TTS_SPEAKER", defaults.tts_speaker.to_string())
                .parse()
                .context("TTS_SPEAKER inválido")?,
            tts_timeout_secs: var("TTS_TIMEOUT_SECS", defaults.tts_timeout_secs.to_string())
                .parse()
                .context("TTS_TIMEOUT_SECS inválido")?,
            max_message_chars: var("MAX_MESSAGE_CHARS", defaults.max_message_chars.to_string())
                .parse()
                .context("MAX_MESSAGE_CHARS inválido")?,

            // Audio
            default_volume: var("DEFAULT_VOLUME", defaults.default_volume.to_string())
                .parse()
                .context("DEFAULT_VOLUME inválido")?,
            max_queue_size: var("MAX_QUEUE_SIZE", defaults.max_queue_size.to_string())
                .parse()
                .context("MAX_QUEUE_SIZE inválido")?,
            queue_overflow: var("QUEUE_OVERFLOW", "drop-newest".to_string()).parse()?,
            read_ahead_ms: var("READ_AHEAD_MS", defaults.read_ahead_ms.to_string())
                .parse()
                .context("READ_AHEAD_MS inválido")?,
            transport_buffer_frames: var(
                "TRANSPORT_BUFFER_FRAMES",
                defaults.transport_buffer_frames.to_string(),
            )
            .parse()
            .context("TRANSPORT_BUFFER_FRAMES inválido")?,
            speech_order: var("SPEECH_ORDER", "completion".to_string()).parse()?,

            // Paths
            clip_dir: match lookup("CLIP_DIR") {
                Some(dir) if dir.trim().is_empty() => None,
                Some(dir) => Some(dir.into()),
                None => defaults.clip_dir,
            },
        })
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - Token must not be empty
    /// - Volume must be between 0.0 and 2.0
    /// - Queue size and message length must be > 0
    /// - Read-ahead must be between 20 and 1000 ms
    /// - Transport buffer must be between 1 and 50 frames
    pub fn validate(&self) -> Result<()> {
        if self.discord_token.trim().is_empty() {
            anyhow::bail!("DISCORD_TOKEN must not be empty");
        }

        url::Url::parse(&self.tts_base_url)
            .with_context(|| format!("Invalid TTS_BASE_URL: {}", self.tts_base_url))?;

        if self.tts_timeout_secs == 0 {
            anyhow::bail!("TTS timeout must be greater than 0");
        }

        if self.max_message_chars == 0 {
            anyhow::bail!("Max message length must be greater than 0");
        }

        // Validate audio settings
        if !(0.0..=2.0).contains(&self.default_volume) {
            anyhow::bail!("Default volume must be between 0.0 and 2.0, got: {}", self.default_volume);
        }

        if self.max_queue_size == 0 {
            anyhow::bail!("Max queue size must be greater than 0");
        }

        if !(20..=1000).contains(&self.read_ahead_ms) {
            anyhow::bail!("Read-ahead must be between 20 and 1000 ms, got: {}", self.read_ahead_ms);
        }

        if !(1..=50).contains(&self.transport_buffer_frames) {
            anyhow::bail!(
                "Transport buffer must be between 1 and 50 frames, got: {}",
                self.transport_buffer_frames
            );
        }

        Ok(())
    }

    pub fn tts_timeout(&self) -> Duration {
        Duration::from_secs(self.tts_timeout_secs)
    }

    /// Frames buffered ahead of the pump for each clip
    pub fn read_ahead_frames(&self) -> usize {
        (self.read_ahead_ms / FRAME_DURATION.as_millis() as u64).max(1) as usize
    }

    pub fn relay_settings(&self) -> RelaySettings {
        RelaySettings {
            speaker: self.tts_speaker,
            max_message_chars: self.max_message_chars,
            read_ahead_frames: self.read_ahead_frames(),
            session: SessionSettings {
                max_pending: self.max_queue_size,
                overflow: self.queue_overflow,
                order: self.speech_order,
            },
        }
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// Excludes the token.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Discord: Guild {}\n  \
            TTS: {} (voz {}, timeout {}s, máx. {} caracteres)\n  \
            Audio: {}% vol, cola {} ({:?}), orden {:?}\n  \
            Buffers: {}ms read-ahead, {} frames transporte\n  \
            Clips: {}",
            self.guild_id.map_or("global".to_string(), |id| id.to_string()),
            self.tts_base_url,
            self.tts_speaker,
            self.tts_timeout_secs,
            self.max_message_chars,
            (self.default_volume * 100.0) as u32,
            self.max_queue_size,
            self.queue_overflow,
            self.speech_order,
            self.read_ahead_ms,
            self.transport_buffer_frames,
            self.clip_dir
                .as_ref()
                .map_or("desactivado".to_string(), |d| d.display().to_string()),
        )
    }
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Discord (no defaults - must be provided)
            discord_token: String::new(),
            guild_id: None,

            // Motor de voz local
            tts_base_url: "http://localhost:50031".to_string(),
            tts_speaker: 0,
            tts_timeout_secs: 30,
            max_message_chars: 200,

            // Audio defaults
            default_volume: 0.3,
            max_queue_size: 32,
            queue_overflow: OverflowPolicy::DropNewest,
            read_ahead_ms: 500,
            transport_buffer_frames: 5,
            speech_order: SpeechOrder::Completion,

            // Path defaults
            clip_dir: Some("./output".into()),
        }
    }
}
