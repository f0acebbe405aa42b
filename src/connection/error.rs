//! Connection error types

use std::sync::Arc;

use mysql_async::DriverError;
use thiserror::Error;

/// Connection and execution errors.
///
/// Cloneable so a cached open failure can be re-raised to every caller
/// during the retry cool-down.
#[derive(Error, Debug, Clone)]
pub enum ConnectionError {
    #[error("Invalid connection string: {0}")]
    InvalidConnectionString(String),

    #[error("Failed to open connection: {0}")]
    Open(Arc<mysql_async::Error>),

    /// The connection is dead and has been discarded
    #[error("Fatal connection error: {0}")]
    Fatal(Arc<mysql_async::Error>),

    /// Statement-level failure; the connection is still usable
    #[error("Driver error: {0}")]
    Driver(Arc<mysql_async::Error>),

    #[error("No value bound for parameter '{0}'")]
    MissingParameter(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl ConnectionError {
    /// Classify a driver error as fatal or statement-level
    pub fn from_driver(err: mysql_async::Error) -> Self {
        if is_fatal_driver_error(&err) {
            ConnectionError::Fatal(Arc::new(err))
        } else {
            ConnectionError::Driver(Arc::new(err))
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, ConnectionError::Fatal(_))
    }

    /// Whether the same call might succeed later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ConnectionError::Open(_) | ConnectionError::Fatal(_) | ConnectionError::Cancelled
        )
    }

    /// Server error code, if the server produced this error
    pub fn server_code(&self) -> Option<u16> {
        match self {
            ConnectionError::Open(e) | ConnectionError::Fatal(e) | ConnectionError::Driver(e) => {
                match e.as_ref() {
                    mysql_async::Error::Server(server) => Some(server.code),
                    _ => None,
                }
            }
            _ => None,
        }
    }
}

/// Result type for connection operations
pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// Whether `err` leaves the connection unusable
pub fn is_fatal_driver_error(err: &mysql_async::Error) -> bool {
    match err {
        mysql_async::Error::Io(_) => true,
        mysql_async::Error::Driver(DriverError::ConnectionClosed) => true,
        mysql_async::Error::Server(server) => {
            FATAL_SERVER_CODES.contains(&server.code) || is_fatal_message(&server.message)
        }
        _ => false,
    }
}

/// Server errors sent just before the server drops the session:
/// shutdown in progress, connection killed, idle timeout
const FATAL_SERVER_CODES: &[u16] = &[1053, 1927, 4031];

/// The server reports connection-killing failures with "fatal error" in the message
pub fn is_fatal_message(message: &str) -> bool {
    message.to_ascii_lowercase().contains("fatal error")
}
