use thiserror::Error;

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Conversation in response has no id")]
    MissingId,

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
}
