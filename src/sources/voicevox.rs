use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use super::ClipSource;
use crate::error::SynthesisError;

/// Límite de tamaño para un clip sintetizado (unos 3 minutos de WAV mono 24 kHz)
const MAX_CLIP_BYTES: usize = 8 * 1024 * 1024;

/// Cliente HTTP para un motor compatible con VOICEVOX.
///
/// La síntesis son dos peticiones: `POST /audio_query` construye la consulta
/// a partir del texto y `POST /synthesis` la convierte en WAV.
#[derive(Debug, Clone)]
pub struct VoicevoxClient {
    client: reqwest::Client,
    base_url: Url,
}

impl VoicevoxClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, SynthesisError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("open-voice/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: normalize_base(base_url)?,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn audio_query_url(&self, speaker: u32, text: &str) -> Result<Url, SynthesisError> {
        let mut url = self.base_url.join("audio_query")?;
        url.query_pairs_mut()
            .append_pair("text", text)
            .append_pair("speaker", &speaker.to_string());
        Ok(url)
    }

    fn synthesis_url(&self, speaker: u32) -> Result<Url, SynthesisError> {
        let mut url = self.base_url.join("synthesis")?;
        url.query_pairs_mut()
            .append_pair("speaker", &speaker.to_string());
        Ok(url)
    }

    async fn audio_query(&self, speaker: u32, text: &str) -> Result<Value, SynthesisError> {
        let response = self
            .client
            .post(self.audio_query_url(speaker, text)?)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SynthesisError::Status(response.status().as_u16()));
        }

        Ok(response.json().await?)
    }

    async fn synthesis(&self, speaker: u32, query: &Value) -> Result<Bytes, SynthesisError> {
        let response = self
            .client
            .post(self.synthesis_url(speaker)?)
            .header(reqwest::header::ACCEPT, "audio/wav")
            .json(query)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SynthesisError::Status(response.status().as_u16()));
        }

        read_capped(response.bytes_stream(), MAX_CLIP_BYTES).await
    }

    /// Versión del motor (`GET /version`), usada por el health check
    pub async fn version(&self) -> Result<String, SynthesisError> {
        let response = self.client.get(self.base_url.join("version")?).send().await?;

        if !response.status().is_success() {
            return Err(SynthesisError::Status(response.status().as_u16()));
        }

        let version = match response.json::<Value>().await? {
            Value::String(v) => v,
            other => other.to_string(),
        };
        info!("🗣️ Motor de voz en {} (versión {})", self.base_url, version);
        Ok(version)
    }
}

#[async_trait]
impl ClipSource for VoicevoxClient {
    async fn synthesize(&self, speaker: u32, text: &str) -> Result<Bytes, SynthesisError> {
        debug!("🗣️ Sintetizando {} caracteres con voz {}", text.chars().count(), speaker);

        let query = self.audio_query(speaker, text).await?;
        let audio = self.synthesis(speaker, &query).await?;

        if audio.is_empty() {
            return Err(SynthesisError::Empty);
        }

        debug!("✅ Clip sintetizado: {} bytes", audio.len());
        Ok(audio)
    }

    fn source_name(&self) -> &'static str {
        "VOICEVOX"
    }
}

/// Collects a response body, failing once it grows past `limit` bytes.
async fn read_capped<S, E>(stream: S, limit: usize) -> Result<Bytes, SynthesisError>
where
    S: Stream<Item = Result<Bytes, E>>,
    SynthesisError: From<E>,
{
    let mut stream = std::pin::pin!(stream);
    let mut body = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if body.len() + chunk.len() > limit {
            warn!("⚠️ Clip de más de {} bytes descartado", limit);
            return Err(SynthesisError::TooLarge(limit));
        }
        body.extend_from_slice(&chunk);
    }

    Ok(body.freeze())
}

/// `Url::join` replaces the last path segment unless the base ends in `/`.
fn normalize_base(base_url: &str) -> Result<Url, url::ParseError> {
    let trimmed = base_url.trim();
    if trimmed.ends_with('/') {
        Url::parse(trimmed)
    } else {
        Url::parse(&format!("{}/", trimmed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn client(base: &str) -> VoicevoxClient {
        VoicevoxClient::new(base, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_audio_query_url_encodes_text() {
        let url = client("http://localhost:50031")
            .audio_query_url(3, "hola & adiós")
            .unwrap();

        assert_eq!(url.path(), "/audio_query");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("text".to_string(), "hola & adiós".to_string()),
                ("speaker".to_string(), "3".to_string()),
            ]
        );
    }

    #[test]
    fn test_base_path_is_kept() {
        let voicevox = client("http://engine.local:8080/tts");
        assert_eq!(
            voicevox.synthesis_url(0).unwrap().as_str(),
            "http://engine.local:8080/tts/synthesis?speaker=0"
        );
        assert_eq!(voicevox.base_url().as_str(), "http://engine.local:8080/tts/");
    }

    #[test]
    fn test_invalid_base_url_is_rejected() {
        let result = VoicevoxClient::new("no es una url", Duration::from_secs(5));
        assert!(matches!(result, Err(SynthesisError::Url(_))));
    }

    fn chunks(sizes: &[usize]) -> impl Stream<Item = Result<Bytes, SynthesisError>> {
        let items: Vec<_> = sizes.iter().map(|n| Ok(Bytes::from(vec![1u8; *n]))).collect();
        futures::stream::iter(items)
    }

    #[tokio::test]
    async fn test_body_within_limit_is_collected() {
        let body = read_capped(chunks(&[4, 4, 2]), 10).await.unwrap();
        assert_eq!(body.len(), 10);
    }

    #[tokio::test]
    async fn test_oversized_body_is_an_error() {
        let result = read_capped(chunks(&[6, 6]), 10).await;
        assert!(matches!(result, Err(SynthesisError::TooLarge(10))));
    }
}
