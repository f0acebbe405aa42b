//! Query compilation error types
//!
//! Every variant here is raised before any network call and is
//! deterministic: retrying the same compilation fails the same way.

use thiserror::Error;

use crate::catalog::names::IdentifierKind;
use crate::types::TypeError;

/// Query compilation errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompileError {
    /// Identifier fails the name validator
    #[error("Invalid {kind} name: '{name}'")]
    InvalidIdentifier { kind: IdentifierKind, name: String },

    /// A bound parameter uses one of the names reserved for pagination
    #[error("Parameter name '{0}' is reserved")]
    ReservedParameterName(String),

    /// Filter contains literal text (quote, backtick or string literal)
    #[error("Unsafe filter expression: {0}")]
    UnsafeExpression(String),

    /// Property not declared on the row model
    #[error("Row model '{model}' has no property '{property}'")]
    UnknownProperty { model: String, property: String },

    /// Filter refers to a parameter it did not declare
    #[error("Filter parameter '{0}' is not declared")]
    UnknownParameter(String),

    /// Filter declares a parameter its expression never uses
    #[error("Filter parameter '{0}' is declared but never used")]
    UnusedParameter(String),

    /// Same parameter declared twice
    #[error("Filter parameter '{0}' is declared more than once")]
    DuplicateParameter(String),

    /// Too many bound parameters on one filter
    #[error("Filter declares {found} parameters (max {max})")]
    TooManyParameters { max: usize, found: usize },

    /// Structurally invalid expression
    #[error("Invalid filter expression: {0}")]
    InvalidExpression(String),

    /// Row model cannot produce the requested statement
    #[error("Invalid row model '{model}': {reason}")]
    InvalidModel { model: String, reason: String },

    /// Filter text failed to parse
    #[error("Filter parse error at {position}: {message}")]
    Parse { position: usize, message: String },

    /// Host/native type mapping failed
    #[error("Type error: {0}")]
    Type(#[from] TypeError),
}

impl CompileError {
    pub(crate) fn invalid_identifier(kind: IdentifierKind, name: &str) -> Self {
        CompileError::InvalidIdentifier {
            kind,
            name: name.to_string(),
        }
    }
}

/// Result type for compilation
pub type CompileResult<T> = Result<T, CompileError>;

/// Validate an identifier, returning it on success
pub(crate) fn check_identifier(kind: IdentifierKind, name: &str) -> CompileResult<&str> {
    if kind.is_valid(name) {
        Ok(name)
    } else {
        Err(CompileError::invalid_identifier(kind, name))
    }
}
