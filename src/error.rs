use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine transport failed: {0}")]
    Transport(String),
    #[error("engine rejected the request: {0}")]
    Rejected(String),
    #[error("engine response could not be decoded: {0}")]
    Decode(String),
}

impl EngineError {
    /// Message surfaced to UI callers. Engine rejections carry the engine's own text.
    pub fn user_message(&self) -> String {
        match self {
            Self::Rejected(message) => message.clone(),
            other => other.to_string(),
        }
    }
}
