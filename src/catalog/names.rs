//! Identifier validation
//!
//! Database and table names: 1-64 characters from `[0-9a-zA-Z$_]`.
//! Variable names additionally allow `.`.
//!
//! Table, column, index and procedure names reuse the database-name rule.
//! The server's identifier grammar is wider than this (quoted identifiers
//! may contain almost anything); the shared rule is a conservative subset,
//! not an engine-exact check.

use lazy_static::lazy_static;
use regex::Regex;

/// Maximum identifier length accepted by the server
pub const MAX_IDENTIFIER_LENGTH: usize = 64;

lazy_static! {
    static ref DATABASE_NAME_RE: Regex = Regex::new(r"^[0-9a-zA-Z$_]+$").expect("valid pattern");
    static ref VARIABLE_NAME_RE: Regex = Regex::new(r"^[0-9a-zA-Z$_.]+$").expect("valid pattern");
}

/// Kind of identifier being validated, used in error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierKind {
    Database,
    Table,
    Column,
    Index,
    Variable,
    Procedure,
}

impl IdentifierKind {
    /// Validate `name` under this kind's rule
    pub fn is_valid(self, name: &str) -> bool {
        match self {
            IdentifierKind::Database => is_valid_database_name(name),
            IdentifierKind::Table => is_valid_table_name(name),
            IdentifierKind::Column => is_valid_column_name(name),
            IdentifierKind::Index => is_valid_index_name(name),
            IdentifierKind::Variable => is_valid_variable_name(name),
            IdentifierKind::Procedure => is_valid_procedure_name(name),
        }
    }
}

impl std::fmt::Display for IdentifierKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            IdentifierKind::Database => "database",
            IdentifierKind::Table => "table",
            IdentifierKind::Column => "column",
            IdentifierKind::Index => "index",
            IdentifierKind::Variable => "variable",
            IdentifierKind::Procedure => "procedure",
        };
        f.write_str(s)
    }
}

fn within_length(name: &str) -> bool {
    !name.is_empty() && name.len() <= MAX_IDENTIFIER_LENGTH
}

pub fn is_valid_database_name(name: &str) -> bool {
    within_length(name) && DATABASE_NAME_RE.is_match(name)
}

pub fn is_valid_table_name(name: &str) -> bool {
    is_valid_database_name(name)
}

pub fn is_valid_column_name(name: &str) -> bool {
    is_valid_database_name(name)
}

pub fn is_valid_index_name(name: &str) -> bool {
    is_valid_database_name(name)
}

pub fn is_valid_procedure_name(name: &str) -> bool {
    is_valid_database_name(name)
}

pub fn is_valid_variable_name(name: &str) -> bool {
    within_length(name) && VARIABLE_NAME_RE.is_match(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_names() {
        assert!(is_valid_database_name("app"));
        assert!(is_valid_database_name("app_2$"));
        assert!(is_valid_database_name(&"a".repeat(64)));

        assert!(!is_valid_database_name(""));
        assert!(!is_valid_database_name(&"a".repeat(65)));
        assert!(!is_valid_database_name("app-db"));
        assert!(!is_valid_database_name("app db"));
        assert!(!is_valid_database_name("app.db"));
        assert!(!is_valid_database_name("a`b"));
    }

    #[test]
    fn test_variable_names_allow_dot() {
        assert!(is_valid_variable_name("session.var"));
        assert!(!is_valid_variable_name("x y"));
        assert!(!is_valid_variable_name(""));
    }

    #[test]
    fn test_other_kinds_share_database_rule() {
        for kind in [
            IdentifierKind::Table,
            IdentifierKind::Column,
            IdentifierKind::Index,
            IdentifierKind::Procedure,
        ] {
            assert!(kind.is_valid("users_1"));
            assert!(!kind.is_valid("users.1"));
        }
    }

    #[test]
    fn test_non_ascii_rejected() {
        assert!(!is_valid_table_name("tablé"));
        // 64 two-byte chars exceed the byte limit
        assert!(!is_valid_variable_name(&"é".repeat(40)));
    }
}
