use std::{fmt, io};

#[cfg(feature = "service")]
use std::{borrow::Cow, error::Error as StdError};

use serde::{Deserialize, Serialize};
use serde_json::Error as JsonError;
use thiserror::Error;

#[cfg(feature = "service")]
use sqlx::{
    error::{DatabaseError, ErrorKind as DatabaseErrorKind},
    migrate::MigrateError,
    Error as SqlxError,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
pub enum MapperError {
    #[error("Reference store unavailable: {0}")]
    ReferenceStoreUnavailable(String),
    #[error("Invalid hierarchy: {0}")]
    InvalidHierarchy(String),
    #[error("Malformed imported state: {0}")]
    MalformedImportedState(String),
    #[error("Invalid match: {0}")]
    InvalidMatch(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Invalid variation feedback: {0}")]
    InvalidFeedback(String),
    #[error("Graph invariant violated: {0}")]
    InvariantViolation(String),
    #[error("Item Not Found: {0}")]
    NotFound(String),
    #[error("(De)Serialization error: {0}")]
    Serialization(String),
    #[error("File System error: {0}")]
    Io(String),
    #[error("Mapping run superseded: started at generation {expected}, graph is now at {found}")]
    Superseded { expected: u64, found: u64 },
    #[error("A batch mapping run is already in progress for this session")]
    RunInProgress,
}

impl From<toml::de::Error> for MapperError {
    fn from(src: toml::de::Error) -> MapperError {
        MapperError::Serialization(format!("Toml deserialization error: {src}"))
    }
}

impl From<toml::ser::Error> for MapperError {
    fn from(src: toml::ser::Error) -> MapperError {
        MapperError::Serialization(format!("Toml serialization error: {src}"))
    }
}

impl From<JsonError> for MapperError {
    fn from(src: JsonError) -> MapperError {
        MapperError::Serialization(format!("JSON (de)serialization error: {src}"))
    }
}

impl From<io::Error> for MapperError {
    fn from(x: io::Error) -> Self {
        match x.kind() {
            io::ErrorKind::NotFound => MapperError::NotFound(format!("{x}")),
            _ => MapperError::Io(format!("IOError: {}", x.kind())),
        }
    }
}

impl From<fmt::Error> for MapperError {
    fn from(x: fmt::Error) -> Self {
        MapperError::Serialization(format!("{x}"))
    }
}

#[cfg(feature = "service")]
impl From<SqlxError> for MapperError {
    fn from(db_error: SqlxError) -> Self {
        MapperError::ReferenceStoreUnavailable(format!("database error: {db_error:?}"))
    }
}

#[cfg(feature = "service")]
impl From<MigrateError> for MapperError {
    fn from(migrate_error: MigrateError) -> Self {
        MapperError::ReferenceStoreUnavailable(format!("migration error: {migrate_error}"))
    }
}

#[cfg(feature = "service")]
impl DatabaseError for MapperError {
    fn message(&self) -> &str {
        "LGD reference store FromRow parsing failure"
    }

    fn kind(&self) -> sqlx::error::ErrorKind {
        DatabaseErrorKind::Other
    }

    #[inline]
    fn code(&self) -> Option<Cow<'_, str>> {
        None
    }

    #[doc(hidden)]
    fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
        self
    }

    #[doc(hidden)]
    fn as_error_mut(&mut self) -> &mut (dyn StdError + Send + Sync + 'static) {
        self
    }

    #[doc(hidden)]
    fn into_error(self: Box<Self>) -> Box<dyn StdError + Send + Sync + 'static> {
        self
    }
}
