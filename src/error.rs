//! Error types for the relay core.
//!
//! Every failure here is local: it is recovered at the component boundary
//! where it happens and never takes the process down. The bot layer keeps
//! using `anyhow` at its edges.

use thiserror::Error;

/// Failures while turning a clip into frames.
#[derive(Error, Debug)]
pub enum DecodeError {
    /// Container could not be recognised
    #[error("Formato de audio no reconocido: {0}")]
    Probe(String),

    /// Container has no decodable audio track
    #[error("El clip no contiene pista de audio")]
    NoAudioTrack,

    /// Codec not available in the registry
    #[error("Códec no soportado: {0}")]
    UnsupportedCodec(String),

    /// A packet failed to decode mid-stream
    #[error("Error decodificando paquete: {0}")]
    Packet(String),

    /// Sample-rate conversion failed
    #[error("Error de remuestreo: {0}")]
    Resample(String),

    /// Raw PCM stream ended inside a sample frame
    #[error("PCM truncado: sobran {0} bytes")]
    Truncated(usize),

    /// Invalid raw PCM parameters
    #[error("Parámetros PCM inválidos: {0}")]
    InvalidFormat(String),

    /// Background decode worker disappeared
    #[error("El decodificador en segundo plano terminó inesperadamente")]
    WorkerGone,
}

/// Failures reported by the speech synthesis service.
#[derive(Error, Debug)]
pub enum SynthesisError {
    #[error("Error HTTP con el motor de voz: {0}")]
    Http(#[from] reqwest::Error),

    #[error("El motor de voz respondió con estado {0}")]
    Status(u16),

    #[error("URL del motor de voz inválida: {0}")]
    Url(#[from] url::ParseError),

    /// Response body exceeded the clip size limit
    #[error("El clip sintetizado supera {0} bytes")]
    TooLarge(usize),

    /// The engine answered but produced no audio
    #[error("El motor de voz no devolvió audio")]
    Empty,
}

/// Failures handing a frame to the voice transport.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// Receiving side dropped (call closed)
    #[error("El transporte de voz está cerrado")]
    Closed,

    /// Transport buffer is full this tick
    #[error("El transporte de voz está saturado")]
    Backlogged,
}

/// Outcome taxonomy of one synthesis-to-playback hand-off.
#[derive(Error, Debug)]
pub enum RelayError {
    /// No audio was produced; reported to chat, queue unaffected
    #[error("Fallo de síntesis: {0}")]
    Synthesis(#[from] SynthesisError),

    /// Synthesised audio could not be loaded
    #[error("Fallo al cargar el audio: {0}")]
    Decode(#[from] DecodeError),

    /// Completion arrived after the session was destroyed
    #[error("La sesión de voz ya no existe")]
    StaleSession,

    /// Session exists but has no live voice connection
    #[error("No hay conexión de voz activa")]
    TransportUnavailable,

    /// Pending queue is at capacity and the policy dropped the clip
    #[error("La cola de lectura está llena (máximo {0})")]
    QueueFull(usize),
}
