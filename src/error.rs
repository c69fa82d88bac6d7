use thiserror::Error;

/// Errors raised by the quati helpers.
#[derive(Error, Debug)]
pub enum QuatiError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Cookie file codec error: {0}")]
    CookieCodec(#[from] bincode::Error),

    #[error("Browser error: {0}")]
    Browser(#[source] anyhow::Error),

    #[error("Mail error: {0}")]
    Mail(String),

    #[error("{operation} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        #[source]
        source: Box<QuatiError>,
    },

    #[error("Retry policy needs at least one attempt")]
    InvalidRetryPolicy,

    #[error("Alert category '{0}' is not supported. Choose from [error, important, note, tip, warning]")]
    UnsupportedAlert(String),

    #[error("Unidentified operating system: {0}")]
    UnsupportedPlatform(String),

    #[error("Field '{field}' has unsupported schema type '{field_type}'")]
    UnknownSchemaType { field: String, field_type: String },

    #[error("Column '{0}' not found in table")]
    MissingColumn(String),

    #[error("Cannot cast '{value}' in column '{column}' to {target}")]
    Cast {
        column: String,
        value: String,
        target: &'static str,
    },

    #[error("Invalid numeric value: {0}")]
    InvalidNumber(String),

    #[error("Malformed table: {0}")]
    Table(String),

    #[error("Spreadsheet not found: {0}")]
    SpreadsheetNotFound(String),

    #[error("Worksheet '{0}' not found")]
    WorksheetNotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<lettre::error::Error> for QuatiError {
    fn from(err: lettre::error::Error) -> Self {
        QuatiError::Mail(err.to_string())
    }
}

impl From<lettre::transport::smtp::Error> for QuatiError {
    fn from(err: lettre::transport::smtp::Error) -> Self {
        QuatiError::Mail(err.to_string())
    }
}

impl From<lettre::message::header::ContentTypeErr> for QuatiError {
    fn from(err: lettre::message::header::ContentTypeErr) -> Self {
        QuatiError::Mail(err.to_string())
    }
}

impl From<lettre::address::AddressError> for QuatiError {
    fn from(err: lettre::address::AddressError) -> Self {
        QuatiError::Mail(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, QuatiError>;
