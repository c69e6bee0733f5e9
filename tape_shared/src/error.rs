use thiserror::Error;

/// Errors surfaced by the public engine API.
///
/// Invalid transport transitions are not errors; they are rejected silently.
#[derive(Debug, Error)]
pub enum TapeError {
    #[error("cannot load sources while the engine is playing")]
    LoadWhilePlaying,

    #[error("failed to fetch `{locator}`: {reason}")]
    Fetch { locator: String, reason: String },

    #[error("failed to decode `{locator}`: {reason}")]
    Decode { locator: String, reason: String },

    #[error("audio output error: {0}")]
    Output(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
