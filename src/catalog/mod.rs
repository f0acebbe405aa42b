//! Catalog - Live schema metadata (databases, tables, columns, indexes)
//!
//! The catalog is a cache over the server's own metadata. Every lookup
//! resynchronizes the level it reads from by running the matching `SHOW`
//! statement and diffing the result against the cache: entries that
//! disappeared are evicted, new ones are added. Column and index sets are
//! swapped wholesale, so readers never see a half-updated table.
//!
//! Introspection failures propagate to the caller unchanged; retrying is
//! left to the connection layer.

pub mod introspect;
pub mod names;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;
use tracing::debug;

use crate::connection::{ConnectionError, QueryExecutor};
use crate::sql::{CompileError, QueryCompiler, RowModel};
use crate::types::{TypeError, TypeRegistry};

pub use introspect::{Column, Index, IndexColumn};
pub use names::IdentifierKind;

/// Catalog errors
#[derive(Error, Debug, Clone)]
pub enum CatalogError {
    #[error("Invalid {kind} name: '{name}'")]
    InvalidName { kind: IdentifierKind, name: String },

    #[error("{kind} '{name}' already exists")]
    AlreadyExists { kind: IdentifierKind, name: String },

    /// The server returned a row the catalog cannot read
    #[error("Malformed introspection result: {0}")]
    Introspection(String),

    #[error(transparent)]
    Type(#[from] TypeError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

impl CatalogError {
    /// Failure talking to the server, as opposed to a deterministic rejection
    pub fn is_transport(&self) -> bool {
        matches!(self, CatalogError::Connection(_))
    }
}

/// Result type for catalog operations
pub type CatalogResult<T> = Result<T, CatalogError>;

fn check_name(kind: IdentifierKind, name: &str) -> CatalogResult<()> {
    if kind.is_valid(name) {
        Ok(())
    } else {
        Err(CatalogError::InvalidName {
            kind,
            name: name.to_string(),
        })
    }
}

/// Names from the first column of each row, skipping any that fail `kind`'s rule
fn live_names(rows: &[crate::connection::TextRow], kind: IdentifierKind) -> HashSet<String> {
    rows.iter()
        .filter_map(|row| row.get_index(0))
        .filter(|name| {
            let valid = kind.is_valid(name);
            if !valid {
                debug!(%kind, name, "Skipping unsupported name");
            }
            valid
        })
        .map(str::to_string)
        .collect()
}

/// Evict entries not in `live` and add new ones. Never fails.
fn apply_diff<T>(
    cache: &mut HashMap<String, Arc<T>>,
    live: HashSet<String>,
    make: impl Fn(&str) -> T,
) -> (usize, usize) {
    let before = cache.len();
    cache.retain(|name, _| live.contains(name));
    let removed = before - cache.len();

    let mut added = 0;
    for name in live {
        if !cache.contains_key(&name) {
            let entry = Arc::new(make(&name));
            cache.insert(name, entry);
            added += 1;
        }
    }
    (added, removed)
}

fn sorted_values<T>(cache: &HashMap<String, Arc<T>>) -> Vec<Arc<T>> {
    let mut names: Vec<_> = cache.keys().collect();
    names.sort();
    names.into_iter().map(|n| Arc::clone(&cache[n])).collect()
}

/// Root of the schema cache
pub struct SchemaCatalog {
    executor: Arc<dyn QueryExecutor>,
    databases: RwLock<HashMap<String, Arc<Database>>>,
}

impl SchemaCatalog {
    pub fn new(executor: Arc<dyn QueryExecutor>) -> Self {
        Self {
            executor,
            databases: RwLock::new(HashMap::new()),
        }
    }

    /// `None` if the name is invalid or the database does not exist
    pub async fn get_database(&self, name: &str) -> CatalogResult<Option<Arc<Database>>> {
        if !names::is_valid_database_name(name) {
            return Ok(None);
        }
        self.sync().await?;
        Ok(self.databases.read().get(name).cloned())
    }

    pub async fn get_all_databases(&self) -> CatalogResult<Vec<Arc<Database>>> {
        self.sync().await?;
        Ok(sorted_values(&self.databases.read()))
    }

    pub async fn create_database(&self, name: &str) -> CatalogResult<Arc<Database>> {
        check_name(IdentifierKind::Database, name)?;
        self.sync().await?;
        if self.databases.read().contains_key(name) {
            return Err(CatalogError::AlreadyExists {
                kind: IdentifierKind::Database,
                name: name.to_string(),
            });
        }
        self.create(name).await
    }

    pub async fn get_or_create_database(&self, name: &str) -> CatalogResult<Arc<Database>> {
        check_name(IdentifierKind::Database, name)?;
        self.sync().await?;
        if let Some(db) = self.databases.read().get(name).cloned() {
            return Ok(db);
        }
        self.create(name).await
    }

    /// Drop a database if it exists
    pub async fn drop_database(&self, name: &str) -> CatalogResult<()> {
        check_name(IdentifierKind::Database, name)?;
        self.executor
            .execute(&format!("DROP DATABASE IF EXISTS `{}`", name))
            .await?;
        self.sync().await
    }

    async fn create(&self, name: &str) -> CatalogResult<Arc<Database>> {
        self.executor
            .execute(&format!("CREATE DATABASE `{}`", name))
            .await?;
        self.sync().await?;
        self.databases.read().get(name).cloned().ok_or_else(|| {
            CatalogError::Introspection(format!("database '{}' missing after create", name))
        })
    }

    /// Full resync against `SHOW DATABASES`
    async fn sync(&self) -> CatalogResult<()> {
        let rows = self.executor.query_rows("SHOW DATABASES").await?;
        let live = live_names(&rows, IdentifierKind::Database);

        let executor = &self.executor;
        let (added, removed) = apply_diff(&mut self.databases.write(), live, |name| {
            Database::new(name, Arc::clone(executor))
        });
        if added + removed > 0 {
            debug!(added, removed, "Database cache resynced");
        }
        Ok(())
    }
}

/// A database (schema) on the server
pub struct Database {
    name: String,
    executor: Arc<dyn QueryExecutor>,
    tables: RwLock<HashMap<String, Arc<Table>>>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").field("name", &self.name).finish()
    }
}

impl Database {
    fn new(name: &str, executor: Arc<dyn QueryExecutor>) -> Self {
        Self {
            name: name.to_string(),
            executor,
            tables: RwLock::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn get_table(&self, name: &str) -> CatalogResult<Option<Arc<Table>>> {
        if !names::is_valid_table_name(name) {
            return Ok(None);
        }
        self.sync().await?;
        Ok(self.tables.read().get(name).cloned())
    }

    pub async fn get_all_tables(&self) -> CatalogResult<Vec<Arc<Table>>> {
        self.sync().await?;
        Ok(sorted_values(&self.tables.read()))
    }

    /// Create the table for `model`
    pub async fn create_table(&self, model: &RowModel) -> CatalogResult<Arc<Table>> {
        let query = QueryCompiler::new(self.name.as_str())?.build_create_table(model)?;

        self.sync().await?;
        if self.tables.read().contains_key(model.table()) {
            return Err(CatalogError::AlreadyExists {
                kind: IdentifierKind::Table,
                name: model.table().to_string(),
            });
        }

        self.executor.execute(query.text()).await?;
        self.sync().await?;
        self.tables.read().get(model.table()).cloned().ok_or_else(|| {
            CatalogError::Introspection(format!("table '{}' missing after create", model.table()))
        })
    }

    /// Full resync against `SHOW TABLES`
    async fn sync(&self) -> CatalogResult<()> {
        let rows = self
            .executor
            .query_rows(&format!("SHOW TABLES FROM `{}`", self.name))
            .await?;
        let live = live_names(&rows, IdentifierKind::Table);

        let executor = &self.executor;
        let database = self.name.as_str();
        let (added, removed) = apply_diff(&mut self.tables.write(), live, |name| {
            Table::new(database, name, Arc::clone(executor))
        });
        if added + removed > 0 {
            debug!(database, added, removed, "Table cache resynced");
        }
        Ok(())
    }
}

/// A table; columns and indexes load on first access
pub struct Table {
    database: String,
    name: String,
    executor: Arc<dyn QueryExecutor>,
    columns: RwLock<Arc<[Arc<Column>]>>,
    indexes: RwLock<Arc<[Arc<Index>]>>,
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("database", &self.database)
            .field("name", &self.name)
            .finish()
    }
}

impl Table {
    fn new(database: &str, name: &str, executor: Arc<dyn QueryExecutor>) -> Self {
        Self {
            database: database.to_string(),
            name: name.to_string(),
            executor,
            columns: RwLock::new(Arc::from(Vec::new())),
            indexes: RwLock::new(Arc::from(Vec::new())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    /// Column by name (case-insensitive, as the server compares them)
    pub async fn get_column(&self, name: &str) -> CatalogResult<Option<Arc<Column>>> {
        let columns = self.get_all_columns().await?;
        Ok(columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
            .cloned())
    }

    /// Columns in table order
    pub async fn get_all_columns(&self) -> CatalogResult<Arc<[Arc<Column>]>> {
        self.sync_columns().await?;
        Ok(Arc::clone(&self.columns.read()))
    }

    /// Index by name (case-insensitive)
    pub async fn get_index(&self, name: &str) -> CatalogResult<Option<Arc<Index>>> {
        let indexes = self.get_all_indexes().await?;
        Ok(indexes
            .iter()
            .find(|i| i.name.eq_ignore_ascii_case(name))
            .cloned())
    }

    /// Indexes ordered by name
    pub async fn get_all_indexes(&self) -> CatalogResult<Arc<[Arc<Index>]>> {
        self.sync_indexes().await?;
        Ok(Arc::clone(&self.indexes.read()))
    }

    fn qualified_name(&self) -> String {
        format!("`{}`.`{}`", self.database, self.name)
    }

    async fn sync_columns(&self) -> CatalogResult<()> {
        let rows = self
            .executor
            .query_rows(&format!("SHOW COLUMNS FROM {}", self.qualified_name()))
            .await?;
        let registry = TypeRegistry::global();
        let fresh = rows
            .iter()
            .map(|row| Column::from_row(row, registry))
            .collect::<CatalogResult<Vec<_>>>()?;

        let mut cache = self.columns.write();
        let merged = reuse_unchanged(&cache, fresh, |c| c.name.as_str());
        *cache = merged;
        Ok(())
    }

    async fn sync_indexes(&self) -> CatalogResult<()> {
        let rows = self
            .executor
            .query_rows(&format!("SHOW INDEX FROM {}", self.qualified_name()))
            .await?;
        let fresh = introspect::indexes_from_rows(&rows)?;

        let mut cache = self.indexes.write();
        let merged = reuse_unchanged(&cache, fresh, |i| i.name.as_str());
        *cache = merged;
        Ok(())
    }
}

/// New entry list, keeping the existing `Arc` for entries whose value is unchanged
fn reuse_unchanged<T: PartialEq>(
    old: &[Arc<T>],
    fresh: Vec<T>,
    key: impl Fn(&T) -> &str,
) -> Arc<[Arc<T>]> {
    fresh
        .into_iter()
        .map(|entry| {
            old.iter()
                .find(|o| key(o) == key(&entry) && ***o == entry)
                .map(Arc::clone)
                .unwrap_or_else(|| Arc::new(entry))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_diff() {
        let mut cache: HashMap<String, Arc<String>> = HashMap::new();
        cache.insert("old".into(), Arc::new("old".into()));
        cache.insert("kept".into(), Arc::new("kept".into()));
        let kept = Arc::clone(&cache["kept"]);

        let live: HashSet<String> = ["kept", "new"].iter().map(|s| s.to_string()).collect();
        let (added, removed) = apply_diff(&mut cache, live, |n| n.to_string());

        assert_eq!((added, removed), (1, 1));
        assert!(Arc::ptr_eq(&kept, &cache["kept"]));
        assert!(cache.contains_key("new") && !cache.contains_key("old"));
    }

    #[test]
    fn test_reuse_unchanged() {
        let old: Vec<Arc<(String, u32)>> = vec![
            Arc::new(("a".into(), 1)),
            Arc::new(("b".into(), 1)),
        ];
        let fresh = vec![("a".to_string(), 1), ("b".to_string(), 2)];
        let merged = reuse_unchanged(&old, fresh, |e| e.0.as_str());

        assert!(Arc::ptr_eq(&merged[0], &old[0]));
        assert!(!Arc::ptr_eq(&merged[1], &old[1]));
        assert_eq!(merged[1].1, 2);
    }

    #[test]
    fn test_transport_distinguished() {
        let err = CatalogError::from(ConnectionError::Cancelled);
        assert!(err.is_transport());
        let err = CatalogError::InvalidName {
            kind: IdentifierKind::Database,
            name: "a b".into(),
        };
        assert!(!err.is_transport());
    }
}
