#![forbid(unsafe_code)]

use tt_core::source::SourceError;

#[derive(Debug)]
pub enum StoreError {
    Io(std::io::Error),
    Sql(rusqlite::Error),
    InvalidInput(&'static str),
    MalformedRow { record_id: String, reason: String },
}

impl StoreError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Io(_) => "STORE_IO",
            Self::Sql(_) => "STORE_SQL",
            Self::InvalidInput(message) if message.starts_with("RESET_REQUIRED") => {
                "RESET_REQUIRED"
            }
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::MalformedRow { .. } => "MALFORMED_ROW",
        }
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "io: {err}"),
            Self::Sql(err) => write!(f, "sqlite: {err}"),
            Self::InvalidInput(message) => write!(f, "invalid input: {message}"),
            Self::MalformedRow { record_id, reason } => {
                write!(f, "malformed observation row (record_id={record_id}): {reason}")
            }
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Sql(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sql(value)
    }
}

impl From<StoreError> for SourceError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::MalformedRow { .. } | StoreError::InvalidInput(_) => {
                SourceError::Malformed(value.to_string())
            }
            StoreError::Io(_) | StoreError::Sql(_) => SourceError::Unavailable(value.to_string()),
        }
    }
}
