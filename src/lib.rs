//! dbcore - MySQL access engine
//!
//! Features:
//! - Host/native type mapping with a fixed, ordered type registry
//! - Live schema catalog resynchronized from the server on demand
//! - Statement compiler for row models, typed filters and keyset pagination
//! - Stored procedure generation from compiled statements
//! - Lazy, retrying connections with read/write pooling

pub mod catalog;
pub mod config;
pub mod connection;
pub mod sql;
pub mod types;
