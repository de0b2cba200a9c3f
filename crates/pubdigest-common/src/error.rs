use thiserror::Error;

#[derive(Debug, Error)]
pub enum DigestError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Upstream request error: {0}")]
    UpstreamRequest(String),

    #[error("Model invocation error: {0}")]
    ModelInvocation(String),

    #[error("Response parse error: {0}")]
    ResponseParse(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("XML parse error: {0}")]
    Xml(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DigestError {
    /// Taxonomy name surfaced in task responses and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            DigestError::Config(_)          => "ConfigurationError",
            DigestError::UpstreamRequest(_) => "UpstreamRequestError",
            DigestError::ModelInvocation(_) => "ModelInvocationError",
            DigestError::ResponseParse(_)   => "ResponseParseError",
            DigestError::Storage(_)         => "StorageError",
            DigestError::InvalidInput(_)    => "InvalidInputError",
            DigestError::Serialization(_)   => "SerializationError",
            DigestError::Xml(_)             => "UpstreamRequestError",
            DigestError::Other(_)           => "UnhandledError",
        }
    }

    /// Status code reported by the invocation surface.
    pub fn status_code(&self) -> u16 {
        match self {
            DigestError::InvalidInput(_) => 400,
            _ => 500,
        }
    }
}

pub type Result<T> = std::result::Result<T, DigestError>;
