use std::time::Duration;
use thiserror::Error;

/// Problems with the process configuration. Surfaced immediately; a
/// connection attempt never starts while one of these is outstanding.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} must be a number in the accepted range, got {value:?}")]
    InvalidNumber { name: &'static str, value: String },

    #[error("{name} is not a valid entity id: {value:?}")]
    InvalidEntityId { name: String, value: String },

    #[error("unsupported scheme in hub URL {0:?}")]
    UnsupportedScheme(String),
}

/// Why a hub session could not be established or ended.
#[derive(Debug, Error)]
pub enum HubError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("hub rejected the access token: {0}")]
    Auth(String),

    #[error("hub connection failed: {0}")]
    Transport(String),

    #[error("hub did not authenticate within {0:?}")]
    Timeout(Duration),
}

impl From<tokio_tungstenite::tungstenite::Error> for HubError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        HubError::Transport(err.to_string())
    }
}

/// A state that cannot be shown on a numeric display.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("entity {entity_id} has non-numeric state {value:?}")]
pub struct DataError {
    pub entity_id: String,
    pub value: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RenderError {
    #[error("element #{0} is not part of the dashboard")]
    MissingElement(String),
}
