//! Row-model descriptors
//!
//! A `RowModel` is the statically registered shape of one row type: its
//! table, its fields in declaration order, and the per-field markers the
//! compiler needs. Build it once (typically behind a `OnceLock` in an
//! `Entity` impl) and pass it to the compiler.

use std::borrow::Cow;

use crate::types::{HostType, HostValue, NativeTypeId, TypeRegistry, TypeResult};

/// Sort direction for ORDER BY and index columns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum SortOrder {
    Ascending,
    Descending,
}

impl SortOrder {
    /// SQL keyword
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortOrder::Ascending => "ASC",
            SortOrder::Descending => "DESC",
        }
    }
}

/// One property of a row model
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    /// Property name as the application knows it
    pub property: String,
    pub host_type: HostType,
    /// Column name override
    pub column: Option<String>,
    pub max_length: Option<u32>,
    /// Native type override
    pub native_type: Option<NativeTypeId>,
    pub primary: bool,
    pub unique: bool,
    pub auto_increment: bool,
    pub immutable: bool,
    /// Creation time. Stamped with the server's UTC time on insert, and
    /// re-stamped on update unless the field is also immutable.
    pub created: bool,
    /// Last modification time. Stamped with the server's UTC time on every
    /// insert and update.
    pub updated: bool,
}

impl FieldDef {
    /// Create a field with an explicit host type
    pub fn new(property: impl Into<String>, host_type: HostType) -> Self {
        Self {
            property: property.into(),
            host_type,
            column: None,
            max_length: None,
            native_type: None,
            primary: false,
            unique: false,
            auto_increment: false,
            immutable: false,
            created: false,
            updated: false,
        }
    }

    /// Create a field whose host type is that of `T`
    pub fn of<T: HostValue>(property: impl Into<String>) -> Self {
        Self::new(property, T::HOST_TYPE)
    }

    /// Override the column name
    #[must_use]
    pub fn column(mut self, name: impl Into<String>) -> Self {
        self.column = Some(name.into());
        self
    }

    #[must_use]
    pub fn max_length(mut self, len: u32) -> Self {
        self.max_length = Some(len);
        self
    }

    /// Override the native type
    #[must_use]
    pub fn native_type(mut self, id: NativeTypeId) -> Self {
        self.native_type = Some(id);
        self
    }

    /// Mark as primary key (implies unique)
    #[must_use]
    pub fn primary(mut self) -> Self {
        self.primary = true;
        self.unique = true;
        self
    }

    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    #[must_use]
    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    #[must_use]
    pub fn immutable(mut self) -> Self {
        self.immutable = true;
        self
    }

    #[must_use]
    pub fn created(mut self) -> Self {
        self.created = true;
        self
    }

    #[must_use]
    pub fn updated(mut self) -> Self {
        self.updated = true;
        self
    }

    /// Database column name: the override, or the property in UPPER_SNAKE case
    pub fn column_name(&self) -> Cow<'_, str> {
        match &self.column {
            Some(name) => Cow::Borrowed(name.as_str()),
            None => Cow::Owned(upper_snake(&self.property)),
        }
    }

    /// Whether the server stamps this column instead of a bound value
    pub fn is_server_timestamp(&self) -> bool {
        self.created || self.updated
    }

    /// Native type: the override, or the canonical mapping of the host type
    pub fn native_type_id(&self, registry: &TypeRegistry) -> TypeResult<NativeTypeId> {
        match self.native_type {
            Some(id) => Ok(id),
            None => registry.host_type_to_native_type(self.host_type),
        }
    }
}

/// Shape of one row type
#[derive(Debug, Clone, PartialEq)]
pub struct RowModel {
    name: String,
    table: String,
    fields: Vec<FieldDef>,
}

impl RowModel {
    /// Create a model for `name` stored in `table`
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            fields: Vec::new(),
        }
    }

    /// Add a field
    #[must_use]
    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Fields in declaration order
    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    /// Get a field by property name
    pub fn get_field(&self, property: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.property == property)
    }

    /// Position of a property in declaration order
    pub fn get_field_index(&self, property: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.property == property)
    }

    /// Primary key fields in declaration order
    pub fn primary_key(&self) -> Vec<&FieldDef> {
        self.fields.iter().filter(|f| f.primary).collect()
    }
}

/// Row types with a statically registered model
pub trait Entity {
    fn row_model() -> &'static RowModel;
}

/// `CreatedAt` -> `CREATED_AT`, `UserID` -> `USER_ID`
pub fn upper_snake(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);

    for (i, &c) in chars.iter().enumerate() {
        if c.is_ascii_uppercase() && i > 0 {
            let prev = chars[i - 1];
            let next_is_lower = chars.get(i + 1).is_some_and(|n| n.is_ascii_lowercase());
            let boundary = prev.is_ascii_lowercase()
                || prev.is_ascii_digit()
                || (prev.is_ascii_uppercase() && next_is_lower);
            if boundary && !out.ends_with('_') {
                out.push('_');
            }
        }
        out.push(c.to_ascii_uppercase());
    }
    out
}
