use thiserror::Error;

use crate::gateway::AnyGatewayError;

#[derive(Debug, Error)]
pub enum AviraError {
    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] avira_http::HttpError),

    #[error("Store error: {0}")]
    Store(#[from] avira_core::StoreError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] AnyGatewayError),

    #[error("Conversation not found: {0}")]
    UnknownConversation(String),

    #[error("Not signed in. Set AVIRA_SESSION_TOKEN or configure ~/.config/avira/config.toml")]
    NotSignedIn,

    #[error("Assistant failed: {0}")]
    RoundFailed(String),
}
