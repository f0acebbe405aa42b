//! Introspection result parsing
//!
//! Turns `SHOW COLUMNS` and `SHOW INDEX` rows into catalog entries.

use std::collections::BTreeMap;

use super::{CatalogError, CatalogResult};
use crate::connection::TextRow;
use crate::sql::SortOrder;
use crate::types::{HostType, NativeTypeId, TypeRegistry};

/// One column as reported by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    /// Declaration as reported, e.g. `bigint unsigned`
    pub declaration: String,
    pub native_type: NativeTypeId,
    pub length: Option<u32>,
    pub host_type: HostType,
    pub nullable: bool,
    pub unique: bool,
    /// Implies `unique`
    pub primary: bool,
    pub auto_increment: bool,
    pub default: Option<String>,
}

impl Column {
    /// Build from one `SHOW COLUMNS` row
    pub fn from_row(row: &TextRow, registry: &TypeRegistry) -> CatalogResult<Self> {
        let name = required(row, "Field")?;
        let declaration = required(row, "Type")?;
        let nullable = required(row, "Null")?.eq_ignore_ascii_case("YES");
        let key = row.get("Key").unwrap_or("");
        let primary = key.eq_ignore_ascii_case("PRI");
        let unique = primary || key.eq_ignore_ascii_case("UNI");
        let auto_increment = row
            .get("Extra")
            .is_some_and(|e| e.to_ascii_lowercase().contains("auto_increment"));

        let parsed = registry.parse_native_type(declaration, nullable)?;

        Ok(Self {
            name: name.to_string(),
            declaration: declaration.to_string(),
            native_type: parsed.native_type,
            length: parsed.length,
            host_type: parsed.host_type,
            nullable,
            unique,
            primary,
            auto_increment,
            default: row.get("Default").map(str::to_string),
        })
    }
}

/// One column of an index, in index order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexColumn {
    pub column: String,
    /// `None` when the server reports no collation (e.g. hash indexes)
    pub sort_order: Option<SortOrder>,
}

/// An index and its ordered columns. `columns` is never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Index {
    pub name: String,
    pub unique: bool,
    pub columns: Vec<IndexColumn>,
}

impl Index {
    pub fn is_primary(&self) -> bool {
        self.name == "PRIMARY"
    }
}

struct IndexRow {
    seq: u32,
    non_unique: bool,
    column: IndexColumn,
}

/// Group `SHOW INDEX` rows into indexes, ordered by index name.
///
/// Rows are sorted by `Seq_in_index` within an index; the lowest-ordinal
/// row decides uniqueness. Rows without a column name (functional key
/// parts) are skipped, and an index left with no columns is dropped.
pub fn indexes_from_rows(rows: &[TextRow]) -> CatalogResult<Vec<Index>> {
    let mut groups: BTreeMap<String, Vec<IndexRow>> = BTreeMap::new();

    for row in rows {
        let name = required(row, "Key_name")?;
        let seq = parse_number(row, "Seq_in_index")?;
        let non_unique = parse_number(row, "Non_unique")? != 0;
        let Some(column) = row.get("Column_name") else {
            continue;
        };
        let sort_order = match row.get("Collation") {
            Some("A") => Some(SortOrder::Ascending),
            Some("D") => Some(SortOrder::Descending),
            _ => None,
        };

        groups.entry(name.to_string()).or_default().push(IndexRow {
            seq,
            non_unique,
            column: IndexColumn {
                column: column.to_string(),
                sort_order,
            },
        });
    }

    Ok(groups
        .into_iter()
        .filter_map(|(name, mut parts)| {
            parts.sort_by_key(|p| p.seq);
            let unique = !parts.first()?.non_unique;
            Some(Index {
                name,
                unique,
                columns: parts.into_iter().map(|p| p.column).collect(),
            })
        })
        .collect())
}

fn required<'r>(row: &'r TextRow, column: &str) -> CatalogResult<&'r str> {
    row.get(column)
        .ok_or_else(|| CatalogError::Introspection(format!("missing '{}' value", column)))
}

fn parse_number(row: &TextRow, column: &str) -> CatalogResult<u32> {
    let raw = required(row, column)?;
    raw.trim().parse().map_err(|_| {
        CatalogError::Introspection(format!("'{}' is not a number: '{}'", column, raw))
    })
}
