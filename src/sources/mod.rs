pub mod archive;
pub mod voicevox;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::SynthesisError;

pub use archive::ClipArchive;
pub use voicevox::VoicevoxClient;

/// Fuente de clips de voz a partir de texto
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClipSource: Send + Sync {
    /// Sintetiza `text` con la voz `speaker` y devuelve el audio completo.
    async fn synthesize(&self, speaker: u32, text: &str) -> Result<Bytes, SynthesisError>;

    /// Nombre para logs
    fn source_name(&self) -> &'static str;
}

/// Normaliza un mensaje antes de sintetizarlo.
///
/// Devuelve `None` para mensajes vacíos. Corta por caracteres, nunca a mitad
/// de un carácter UTF-8.
pub fn prepare_text(text: &str, max_chars: usize) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() || max_chars == 0 {
        return None;
    }

    match trimmed.char_indices().nth(max_chars) {
        Some((cut, _)) => Some(trimmed[..cut].trim_end().to_string()),
        None => Some(trimmed.to_string()),
    }
}
