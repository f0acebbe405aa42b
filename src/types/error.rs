//! Type system error types

use thiserror::Error;

use super::HostType;

/// Type mapping errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TypeError {
    /// Declaration does not match `<name>(<length>)[ unsigned]`
    #[error("Unparsable type declaration: '{0}'")]
    Unparsable(String),

    /// No native type is registered for this host type
    #[error("No native type mapped for host type {0}")]
    Unmapped(HostType),

    /// Unknown or unregistered native type id
    #[error("Invalid native type id {0:#04x}")]
    InvalidTypeId(u8),
}

/// Result type for type system operations
pub type TypeResult<T> = Result<T, TypeError>;
