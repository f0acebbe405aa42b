//! Parameter binding
//!
//! Compiled statements name their placeholders (`@Name`). The driver binds
//! positionally, so binding rewrites each placeholder to `?` and collects
//! the values in textual order. A name used twice is bound twice.

use std::collections::HashMap;

use mysql_async::{Params, Value};

use super::error::{ConnectionError, ConnectionResult};
use crate::sql::SqlQuery;

/// Values for a compiled statement, keyed by parameter name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamValues {
    values: HashMap<String, Value>,
}

impl ParamValues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of `insert`
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Positional statement text and values for `query`
    pub fn bind(&self, query: &SqlQuery) -> ConnectionResult<(String, Params)> {
        let mut positional = Vec::new();
        let mut missing = None;

        let text = query.rewrite_placeholders(|name| {
            match self.values.get(name) {
                Some(value) => positional.push(value.clone()),
                None => {
                    if missing.is_none() {
                        missing = Some(name.to_string());
                    }
                }
            }
            "?".to_string()
        });

        if let Some(name) = missing {
            return Err(ConnectionError::MissingParameter(name));
        }
        let params = if positional.is_empty() {
            Params::Empty
        } else {
            Params::Positional(positional)
        };
        Ok((text, params))
    }
}
