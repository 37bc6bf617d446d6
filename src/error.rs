use thiserror::Error;

/// Configuration-related errors with structured variants.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("failed to read config file: {0}")]
    ReadFile(#[source] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[source] toml::de::Error),
}

/// Errors raised by a message fetcher. Any of these aborts the current batch.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("missing access token: set {env_var}")]
    MissingToken { env_var: &'static str },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("mail service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed mail service response: {0}")]
    Json(#[from] serde_json::Error),

    #[error("mailbox path not found: {0}")]
    MailboxNotFound(String),

    #[error("message not found: {0}")]
    MessageNotFound(String),

    #[error("failed to read message {id}: {source}")]
    Read {
        id: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse MIME message {id}: {source}")]
    Mime {
        id: String,
        #[source]
        source: mailparse::MailParseError,
    },
}

/// Errors reading or writing the flat-file order cache.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache CSV error: {0}")]
    Csv(#[from] csv::Error),
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Batch(#[from] crate::batch::BatchError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
