//! SQL layer - row models, predicates, and statement generation
//!
//! This module provides:
//! - `RowModel`: The static shape of a row type
//! - `Filter`: A validated row predicate, built or parsed
//! - `QueryCompiler`: Builds parameterized statements from models
//! - `procedure`: Wraps compiled statements in stored procedures

pub mod compiler;
pub mod error;
pub mod model;
pub mod predicate;
pub mod procedure;

pub use compiler::{
    is_reserved_parameter_name, OrderBy, ParameterDirection, QueryCompiler, SqlQuery,
    SqlQueryParameter, COUNT_PARAMETER, EXCLUSIVE_START_PARAMETER, IS_ASCENDING_PARAMETER,
};
pub use error::{CompileError, CompileResult};
pub use model::{Entity, FieldDef, RowModel, SortOrder};
pub use predicate::{field, param, Expr, Filter, FilterParam};
pub use procedure::{build_create_procedure, build_drop_procedure};
