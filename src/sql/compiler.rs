//! Query compiler
//!
//! Turns a `RowModel` plus an optional `Filter` and `OrderBy` into a
//! parameterized MySQL statement. Parameters appear in the text as
//! `@Name` placeholders; `SqlQuery::parameters` lists them with their
//! native types so the same statement can be executed directly or wrapped
//! in a stored procedure.
//!
//! Three parameter names are reserved for pagination: `Count`,
//! `ExclusiveStart` and `IsAscending`.

use std::fmt::{self, Write};

use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::catalog::names::IdentifierKind;
use crate::sql::error::{check_identifier, CompileError, CompileResult};
use crate::sql::model::{Entity, FieldDef, RowModel, SortOrder};
use crate::sql::predicate::Filter;
use crate::types::{HostType, HostValue, NativeTypeId, TypeRegistry};

/// Row limit of a select
pub const COUNT_PARAMETER: &str = "Count";
/// Key after which a page starts; NULL for the first page
pub const EXCLUSIVE_START_PARAMETER: &str = "ExclusiveStart";
/// Page direction
pub const IS_ASCENDING_PARAMETER: &str = "IsAscending";

/// Names callers may not use for their own parameters
pub const RESERVED_PARAMETER_NAMES: [&str; 3] = [
    COUNT_PARAMETER,
    EXCLUSIVE_START_PARAMETER,
    IS_ASCENDING_PARAMETER,
];

lazy_static! {
    static ref PLACEHOLDER_RE: Regex =
        Regex::new(r"@([0-9A-Za-z$_]+)").expect("valid pattern");
}

/// Case-insensitive, since the server treats routine parameter names that way
pub fn is_reserved_parameter_name(name: &str) -> bool {
    RESERVED_PARAMETER_NAMES
        .iter()
        .any(|r| r.eq_ignore_ascii_case(name))
}

/// Direction of a routine parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParameterDirection {
    In,
    Out,
    InOut,
}

impl ParameterDirection {
    pub fn as_sql(&self) -> &'static str {
        match self {
            ParameterDirection::In => "IN",
            ParameterDirection::Out => "OUT",
            ParameterDirection::InOut => "INOUT",
        }
    }
}

/// One placeholder of a compiled statement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlQueryParameter {
    pub name: String,
    /// Declaration name without length, e.g. `varbinary` or `int unsigned`
    pub native_type_name: String,
    pub length: Option<u32>,
    pub direction: ParameterDirection,
}

impl SqlQueryParameter {
    /// Parameter typed by the canonical mapping of `host_type`
    pub fn for_host_type(
        name: impl Into<String>,
        host_type: HostType,
        length: Option<u32>,
    ) -> CompileResult<Self> {
        let registry = TypeRegistry::global();
        let id = registry.host_type_to_native_type(host_type)?;
        Self::for_native_type(name, id, length)
    }

    /// Parameter of native type `id`. `enum` and `set` carry no member
    /// list here, so they are declared as `varchar`.
    pub fn for_native_type(
        name: impl Into<String>,
        id: NativeTypeId,
        length: Option<u32>,
    ) -> CompileResult<Self> {
        let id = match id {
            NativeTypeId::Enum | NativeTypeId::Set => NativeTypeId::VarChar,
            other => other,
        };
        let registry = TypeRegistry::global();
        Ok(Self {
            name: name.into(),
            native_type_name: registry.declaration_name(id)?.to_string(),
            length,
            direction: ParameterDirection::In,
        })
    }

    /// Full declaration, e.g. `varbinary(64)`. Types that need a length
    /// and have none get the default.
    pub fn declaration(&self) -> CompileResult<String> {
        let registry = TypeRegistry::global();
        let parsed = registry.parse_native_type(&self.native_type_name, false)?;
        Ok(registry.format_declaration(parsed.native_type, self.length)?)
    }
}

/// A compiled statement and its parameter list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlQuery {
    text: String,
    parameters: Vec<SqlQueryParameter>,
}

impl SqlQuery {
    pub(crate) fn new(text: String, parameters: Vec<SqlQueryParameter>) -> Self {
        debug!(sql = %text, parameters = parameters.len(), "Compiled statement");
        Self { text, parameters }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn parameters(&self) -> &[SqlQueryParameter] {
        &self.parameters
    }

    pub fn parameter(&self, name: &str) -> Option<&SqlQueryParameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Placeholder names in textual order, repeats included
    pub fn placeholders(&self) -> Vec<&str> {
        placeholders(&self.text)
    }

    /// Rewrite every `@Name` placeholder through `f`
    pub fn rewrite_placeholders(&self, mut f: impl FnMut(&str) -> String) -> String {
        PLACEHOLDER_RE
            .replace_all(&self.text, |caps: &Captures<'_>| f(&caps[1]))
            .into_owned()
    }

    pub fn into_parts(self) -> (String, Vec<SqlQueryParameter>) {
        (self.text, self.parameters)
    }
}

impl fmt::Display for SqlQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Placeholder names in `text`, in order of appearance
pub fn placeholders(text: &str) -> Vec<&str> {
    PLACEHOLDER_RE
        .captures_iter(text)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect()
}

/// Ordering by one property of a model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    property: String,
    sort_order: SortOrder,
}

impl OrderBy {
    /// Fails if `property` is not a field of `model`
    pub fn new(model: &RowModel, property: &str, sort_order: SortOrder) -> CompileResult<Self> {
        lookup_field(model, property)?;
        Ok(Self {
            property: property.to_string(),
            sort_order,
        })
    }

    pub fn ascending(model: &RowModel, property: &str) -> CompileResult<Self> {
        Self::new(model, property, SortOrder::Ascending)
    }

    pub fn descending(model: &RowModel, property: &str) -> CompileResult<Self> {
        Self::new(model, property, SortOrder::Descending)
    }

    /// Ordering on an entity's registered model
    pub fn of<E: Entity>(property: &str, sort_order: SortOrder) -> CompileResult<Self> {
        Self::new(E::row_model(), property, sort_order)
    }

    pub fn property(&self) -> &str {
        &self.property
    }

    pub fn sort_order(&self) -> SortOrder {
        self.sort_order
    }
}

/// Builds statements for tables of one database
#[derive(Debug, Clone)]
pub struct QueryCompiler {
    database: String,
    registry: &'static TypeRegistry,
}

impl QueryCompiler {
    /// Fails if `database` is not a valid database name
    pub fn new(database: impl Into<String>) -> CompileResult<Self> {
        let database = database.into();
        check_identifier(IdentifierKind::Database, &database)?;
        Ok(Self {
            database,
            registry: TypeRegistry::global(),
        })
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    /// `SELECT ... LIMIT @Count`, optionally filtered and ordered
    pub fn build_select_top(
        &self,
        model: &RowModel,
        filter: Option<&Filter>,
        order_by: Option<&OrderBy>,
    ) -> CompileResult<SqlQuery> {
        let mut params = Vec::new();
        let mut sql = self.select_head(model)?;

        if let Some(filter) = filter {
            write!(sql, "\nWHERE {}", filter.to_sql(model)?).ok();
            push_filter_params(filter, &mut params)?;
        }
        if let Some(order_by) = order_by {
            let field = lookup_field(model, order_by.property())?;
            write!(
                sql,
                "\nORDER BY {} {}",
                column_ref(field)?,
                order_by.sort_order().as_sql()
            )
            .ok();
        }
        write!(sql, "\nLIMIT @{};", COUNT_PARAMETER).ok();
        params.push(count_param()?);

        Ok(SqlQuery::new(sql, params))
    }

    /// Keyset pagination on `order_by.property`.
    ///
    /// `@IsAscending` picks the direction at execution time; the sort order
    /// stored in `order_by` is ignored. A NULL `@ExclusiveStart` starts at
    /// the first row of the chosen direction.
    pub fn build_select_paged(
        &self,
        model: &RowModel,
        order_by: &OrderBy,
        filter: Option<&Filter>,
    ) -> CompileResult<SqlQuery> {
        let key_field = lookup_field(model, order_by.property())?;
        let key = column_ref(key_field)?;

        let mut params = Vec::new();
        let mut sql = self.select_head(model)?;

        let keyset = format!(
            "(@{start} IS NULL\n\t\tOR (@{asc} AND {key} > @{start})\n\t\tOR (NOT @{asc} AND {key} < @{start}))",
            start = EXCLUSIVE_START_PARAMETER,
            asc = IS_ASCENDING_PARAMETER,
            key = key,
        );
        match filter {
            Some(filter) => {
                write!(sql, "\nWHERE {}\n\tAND {}", filter.to_sql(model)?, keyset).ok();
                push_filter_params(filter, &mut params)?;
            }
            None => {
                write!(sql, "\nWHERE {}", keyset).ok();
            }
        }
        write!(
            sql,
            "\nORDER BY\n\tCASE WHEN @{asc} THEN {key} END ASC,\n\tCASE WHEN NOT @{asc} THEN {key} END DESC\nLIMIT @{count};",
            asc = IS_ASCENDING_PARAMETER,
            key = key,
            count = COUNT_PARAMETER,
        )
        .ok();

        params.push(SqlQueryParameter::for_host_type(
            IS_ASCENDING_PARAMETER,
            bool::HOST_TYPE,
            None,
        )?);
        params.push(SqlQueryParameter::for_host_type(
            EXCLUSIVE_START_PARAMETER,
            key_field.host_type.nullable(),
            key_field.max_length,
        )?);
        params.push(count_param()?);

        Ok(SqlQuery::new(sql, params))
    }

    /// `SELECT COUNT(*)`, optionally filtered
    pub fn build_count(&self, model: &RowModel, filter: Option<&Filter>) -> CompileResult<SqlQuery> {
        let mut params = Vec::new();
        let mut sql = format!("SELECT COUNT(*)\nFROM {}", self.table_ref(model)?);
        if let Some(filter) = filter {
            write!(sql, "\nWHERE {}", filter.to_sql(model)?).ok();
            push_filter_params(filter, &mut params)?;
        }
        sql.push(';');
        Ok(SqlQuery::new(sql, params))
    }

    /// Insert one row. Auto-increment columns are left to the server and
    /// created/updated columns are stamped with `UTC_TIMESTAMP()`.
    pub fn build_insert(&self, model: &RowModel) -> CompileResult<SqlQuery> {
        let table = self.table_ref(model)?;
        let mut columns = Vec::new();
        let mut values = Vec::new();
        let mut params = Vec::new();

        for field in model.fields().iter().filter(|f| !f.auto_increment) {
            columns.push(column_ref(field)?);
            if field.is_server_timestamp() {
                values.push("UTC_TIMESTAMP()".to_string());
            } else {
                values.push(format!("@{}", field.property));
                params.push(self.field_param(field)?);
            }
        }

        let sql = format!(
            "INSERT INTO {} (\n\t{}\n) VALUES (\n\t{}\n);",
            table,
            columns.join(",\n\t"),
            values.join(",\n\t")
        );
        Ok(SqlQuery::new(sql, params))
    }

    /// Update the rows matching `filter`. Immutable columns are never
    /// written; created/updated columns are re-stamped.
    ///
    /// A filter parameter named like a column parameter is bound once, with
    /// the column's type.
    pub fn build_update(&self, model: &RowModel, filter: &Filter) -> CompileResult<SqlQuery> {
        let table = self.table_ref(model)?;
        let mut assignments = Vec::new();
        let mut params = Vec::new();

        for field in model.fields().iter().filter(|f| !f.immutable) {
            let column = column_ref(field)?;
            if field.is_server_timestamp() {
                assignments.push(format!("{} = UTC_TIMESTAMP()", column));
            } else {
                assignments.push(format!("{} = @{}", column, field.property));
                params.push(self.field_param(field)?);
            }
        }
        if assignments.is_empty() {
            return Err(CompileError::InvalidModel {
                model: model.name().to_string(),
                reason: "no mutable columns to update".to_string(),
            });
        }

        let predicate = filter.to_sql(model)?;
        push_filter_params(filter, &mut params)?;

        let sql = format!(
            "UPDATE {} SET\n\t{}\nWHERE {};",
            table,
            assignments.join(",\n\t"),
            predicate
        );
        Ok(SqlQuery::new(sql, params))
    }

    /// Delete the rows matching `filter`
    pub fn build_delete(&self, model: &RowModel, filter: &Filter) -> CompileResult<SqlQuery> {
        let mut params = Vec::new();
        let sql = format!(
            "DELETE FROM {}\nWHERE {};",
            self.table_ref(model)?,
            filter.to_sql(model)?
        );
        push_filter_params(filter, &mut params)?;
        Ok(SqlQuery::new(sql, params))
    }

    /// `CREATE TABLE` with primary and unique keys
    pub fn build_create_table(&self, model: &RowModel) -> CompileResult<SqlQuery> {
        if model.fields().is_empty() {
            return Err(CompileError::InvalidModel {
                model: model.name().to_string(),
                reason: "no fields".to_string(),
            });
        }

        let mut lines = Vec::new();
        for field in model.fields() {
            lines.push(self.column_definition(field)?);
        }

        let primary = model.primary_key();
        if !primary.is_empty() {
            let columns = primary
                .iter()
                .map(|f| column_ref(f))
                .collect::<CompileResult<Vec<_>>>()?;
            lines.push(format!("PRIMARY KEY ({})", columns.join(", ")));
        }

        for field in model.fields().iter().filter(|f| f.unique && !f.primary) {
            let column = field.column_name();
            let index = format!("UQ_{}", column);
            check_identifier(IdentifierKind::Index, &index)?;
            lines.push(format!("UNIQUE KEY `{}` (`{}`)", index, column));
        }

        let sql = format!(
            "CREATE TABLE {} (\n\t{}\n);",
            self.table_ref(model)?,
            lines.join(",\n\t")
        );
        Ok(SqlQuery::new(sql, Vec::new()))
    }

    /// Add the column for `property`, positioned after its predecessor in
    /// declaration order (or `FIRST`)
    pub fn build_add_column(&self, model: &RowModel, property: &str) -> CompileResult<SqlQuery> {
        let index = model
            .get_field_index(property)
            .ok_or_else(|| unknown_property(model, property))?;
        let field = &model.fields()[index];

        let position = match index.checked_sub(1) {
            Some(prev) => format!("AFTER {}", column_ref(&model.fields()[prev])?),
            None => "FIRST".to_string(),
        };

        let sql = format!(
            "ALTER TABLE {}\n\tADD COLUMN {} {};",
            self.table_ref(model)?,
            self.column_definition(field)?,
            position
        );
        Ok(SqlQuery::new(sql, Vec::new()))
    }

    /// Drop one column. Needs no row model.
    pub fn build_drop_column(database: &str, table: &str, column: &str) -> CompileResult<SqlQuery> {
        check_identifier(IdentifierKind::Database, database)?;
        check_identifier(IdentifierKind::Table, table)?;
        check_identifier(IdentifierKind::Column, column)?;

        let sql = format!(
            "ALTER TABLE `{}`.`{}`\n\tDROP COLUMN `{}`;",
            database, table, column
        );
        Ok(SqlQuery::new(sql, Vec::new()))
    }

    fn table_ref(&self, model: &RowModel) -> CompileResult<String> {
        check_identifier(IdentifierKind::Table, model.table())?;
        Ok(format!("`{}`.`{}`", self.database, model.table()))
    }

    fn select_head(&self, model: &RowModel) -> CompileResult<String> {
        if model.fields().is_empty() {
            return Err(CompileError::InvalidModel {
                model: model.name().to_string(),
                reason: "no fields".to_string(),
            });
        }

        let mut items = Vec::with_capacity(model.fields().len());
        for field in model.fields() {
            let column = column_ref(field)?;
            if field.column_name() == field.property.as_str() {
                items.push(column);
            } else {
                check_identifier(IdentifierKind::Column, &field.property)?;
                items.push(format!("{} AS `{}`", column, field.property));
            }
        }

        Ok(format!(
            "SELECT\n\t{}\nFROM {}",
            items.join(",\n\t"),
            self.table_ref(model)?
        ))
    }

    fn column_definition(&self, field: &FieldDef) -> CompileResult<String> {
        let id = field.native_type_id(self.registry)?;
        let mut def = format!(
            "{} {} {}",
            column_ref(field)?,
            self.registry.format_declaration(id, field.max_length)?,
            if field.host_type.nullable {
                "NULL"
            } else {
                "NOT NULL"
            }
        );
        if field.auto_increment {
            def.push_str(" AUTO_INCREMENT");
        }
        if field.is_server_timestamp()
            && matches!(id, NativeTypeId::DateTime | NativeTypeId::Timestamp)
        {
            def.push_str(" DEFAULT CURRENT_TIMESTAMP");
        }
        Ok(def)
    }

    /// Parameter bound to a column value
    fn field_param(&self, field: &FieldDef) -> CompileResult<SqlQueryParameter> {
        if is_reserved_parameter_name(&field.property) {
            return Err(CompileError::ReservedParameterName(field.property.clone()));
        }
        if !IdentifierKind::Variable.is_valid(&field.property) || field.property.contains('.') {
            return Err(CompileError::invalid_identifier(
                IdentifierKind::Variable,
                &field.property,
            ));
        }
        let id = field.native_type_id(self.registry)?;
        SqlQueryParameter::for_native_type(field.property.as_str(), id, field.max_length)
    }
}

fn lookup_field<'m>(model: &'m RowModel, property: &str) -> CompileResult<&'m FieldDef> {
    model
        .get_field(property)
        .ok_or_else(|| unknown_property(model, property))
}

fn unknown_property(model: &RowModel, property: &str) -> CompileError {
    CompileError::UnknownProperty {
        model: model.name().to_string(),
        property: property.to_string(),
    }
}

/// Backtick-quoted column name of `field`, validated
pub(crate) fn column_ref(field: &FieldDef) -> CompileResult<String> {
    let column = field.column_name();
    check_identifier(IdentifierKind::Column, &column)?;
    Ok(format!("`{}`", column))
}

fn count_param() -> CompileResult<SqlQueryParameter> {
    SqlQueryParameter::for_host_type(COUNT_PARAMETER, i32::HOST_TYPE, None)
}

/// Append filter parameters not already bound
fn push_filter_params(filter: &Filter, params: &mut Vec<SqlQueryParameter>) -> CompileResult<()> {
    for p in filter.params() {
        if params.iter().any(|q| q.name == p.name) {
            continue;
        }
        params.push(SqlQueryParameter::for_host_type(
            p.name.as_str(),
            p.host_type,
            None,
        )?);
    }
    Ok(())
}
