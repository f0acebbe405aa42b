//! dbcore schema inspection binary
//!
//! Usage: dbcore [--connection-string URL] <command>
//!
//! Exit codes:
//!   0 - Success
//!   2 - Configuration error
//!   3 - Server error
//!   4 - Not found

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use dbcore::catalog::{CatalogError, SchemaCatalog};
use dbcore::config::{ConnectionSettings, SettingsStore, CONNECTION_STRING_VAR};
use dbcore::connection::ConnectionPool;
use dbcore::types::TypeRegistry;

#[derive(Parser)]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Inspect a MySQL server's schema")]
struct Cli {
    #[arg(long, env = CONNECTION_STRING_VAR)]
    connection_string: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List databases
    Databases,
    /// List tables of a database
    Tables { database: String },
    /// Describe the columns of a table
    Columns { database: String, table: String },
    /// Describe the indexes of a table
    Indexes { database: String, table: String },
    /// Parse a native type declaration without connecting
    ParseType {
        declaration: String,
        #[arg(long)]
        nullable: bool,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let Cli {
        connection_string,
        command,
    } = Cli::parse();

    if let Command::ParseType {
        declaration,
        nullable,
    } = &command
    {
        match TypeRegistry::global().parse_native_type(declaration, *nullable) {
            Ok(parsed) => {
                println!("name:        {}", parsed.name);
                println!("length:      {:?}", parsed.length);
                println!("host type:   {}", parsed.host_type);
                println!("native type: {:?}", parsed.native_type);
                std::process::exit(0);
            }
            Err(e) => {
                eprintln!("ERROR: {}", e);
                std::process::exit(2);
            }
        }
    }

    let Some(connection_string) = connection_string else {
        eprintln!("ERROR: No connection string. Pass --connection-string or set {}", CONNECTION_STRING_VAR);
        std::process::exit(2);
    };

    let settings = SettingsStore::new(ConnectionSettings::new(connection_string));
    let pool = match ConnectionPool::new(&settings) {
        Ok(pool) => Arc::new(pool),
        Err(e) => {
            eprintln!("ERROR: {}", e);
            std::process::exit(2);
        }
    };
    let catalog = SchemaCatalog::new(pool.clone());

    let code = match run(&catalog, command).await {
        Ok(true) => 0,
        Ok(false) => 4,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            if e.is_transport() {
                3
            } else {
                2
            }
        }
    };

    let _ = pool.close().await;
    std::process::exit(code);
}

/// Returns `Ok(false)` when the requested object does not exist
async fn run(catalog: &SchemaCatalog, command: Command) -> Result<bool, CatalogError> {
    match command {
        Command::Databases => {
            for db in catalog.get_all_databases().await? {
                println!("{}", db.name());
            }
        }
        Command::Tables { database } => {
            let Some(db) = catalog.get_database(&database).await? else {
                eprintln!("Database '{}' not found", database);
                return Ok(false);
            };
            for table in db.get_all_tables().await? {
                println!("{}", table.name());
            }
        }
        Command::Columns { database, table } => {
            let Some(db) = catalog.get_database(&database).await? else {
                eprintln!("Database '{}' not found", database);
                return Ok(false);
            };
            let Some(table) = db.get_table(&table).await? else {
                eprintln!("Table '{}' not found", table);
                return Ok(false);
            };
            for col in table.get_all_columns().await?.iter() {
                let mut flags = Vec::new();
                if col.primary {
                    flags.push("primary");
                } else if col.unique {
                    flags.push("unique");
                }
                if col.auto_increment {
                    flags.push("auto_increment");
                }
                println!(
                    "{:<32} {:<24} {:<16} {}",
                    col.name,
                    col.declaration,
                    col.host_type.to_string(),
                    flags.join(",")
                );
            }
        }
        Command::Indexes { database, table } => {
            let Some(db) = catalog.get_database(&database).await? else {
                eprintln!("Database '{}' not found", database);
                return Ok(false);
            };
            let Some(table) = db.get_table(&table).await? else {
                eprintln!("Table '{}' not found", table);
                return Ok(false);
            };
            for index in table.get_all_indexes().await?.iter() {
                let columns: Vec<String> = index
                    .columns
                    .iter()
                    .map(|c| match c.sort_order {
                        Some(order) => format!("{} {}", c.column, order.as_sql()),
                        None => c.column.clone(),
                    })
                    .collect();
                println!(
                    "{:<32} {:<7} ({})",
                    index.name,
                    if index.unique { "unique" } else { "" },
                    columns.join(", ")
                );
            }
        }
        Command::ParseType { .. } => {}
    }
    Ok(true)
}
