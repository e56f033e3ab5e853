use thiserror::Error;

/// All errors produced by voxlink.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("capture device unavailable: {0}")]
    CaptureAcquisition(String),

    #[error("audio processor failed to load: {0}")]
    ProcessorLoad(String),

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("malformed audio payload: {0}")]
    MalformedPayload(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("output device error: {0}")]
    Output(String),

    #[error("no open connection")]
    NotConnected,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("base64 error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, LinkError>;
