//! Stored procedure generation
//!
//! Wraps a compiled statement in `CREATE PROCEDURE`. Each query parameter
//! becomes a routine parameter named `p_<Name>`, and each `@Name`
//! placeholder in the body is rewritten to refer to it. The prefix keeps
//! routine parameters from shadowing column names inside the body.

use std::fmt::Write;

use crate::catalog::names::IdentifierKind;
use crate::sql::compiler::SqlQuery;
use crate::sql::error::{check_identifier, CompileError, CompileResult};

/// Prefix of routine parameter names
pub const PROCEDURE_PARAMETER_PREFIX: &str = "p_";

/// Delimiter used when the script goes through a client that splits on `;`
pub const ALTERNATE_DELIMITER: &str = "$$";

/// Routine parameter name for a query parameter
pub fn procedure_parameter_name(name: &str) -> String {
    format!("{}{}", PROCEDURE_PARAMETER_PREFIX, name)
}

/// `CREATE PROCEDURE` around `query`.
///
/// With `use_alternate_delimiter` the script is wrapped in
/// `DELIMITER $$ ... DELIMITER ;` for command-line clients. Without it,
/// the text is a single statement suitable for a driver.
///
/// The result carries the same parameter list as `query`, which is the
/// procedure's `CALL` signature.
pub fn build_create_procedure(
    database: &str,
    name: &str,
    query: &SqlQuery,
    use_alternate_delimiter: bool,
) -> CompileResult<SqlQuery> {
    check_identifier(IdentifierKind::Database, database)?;
    check_identifier(IdentifierKind::Procedure, name)?;

    let mut declarations = Vec::with_capacity(query.parameters().len());
    for p in query.parameters() {
        declarations.push(format!(
            "{} `{}` {}",
            p.direction.as_sql(),
            procedure_parameter_name(&p.name),
            p.declaration()?
        ));
    }

    let mut unbound = None;
    let body = query.rewrite_placeholders(|placeholder| {
        if query.parameter(placeholder).is_none() && unbound.is_none() {
            unbound = Some(placeholder.to_string());
        }
        format!("`{}`", procedure_parameter_name(placeholder))
    });
    if let Some(placeholder) = unbound {
        return Err(CompileError::UnknownParameter(placeholder));
    }

    let body = body
        .lines()
        .map(|line| format!("\t{}", line))
        .collect::<Vec<_>>()
        .join("\n");

    let mut sql = String::new();
    if use_alternate_delimiter {
        writeln!(sql, "DELIMITER {}", ALTERNATE_DELIMITER).ok();
    }
    write!(sql, "CREATE PROCEDURE `{}`.`{}`(", database, name).ok();
    if declarations.is_empty() {
        sql.push_str(")\n");
    } else {
        write!(sql, "\n\t{}\n)\n", declarations.join(",\n\t")).ok();
    }
    write!(sql, "BEGIN\n{}\nEND", body).ok();
    if use_alternate_delimiter {
        write!(sql, "{}\nDELIMITER ;", ALTERNATE_DELIMITER).ok();
    } else {
        sql.push(';');
    }

    Ok(SqlQuery::new(sql, query.parameters().to_vec()))
}

/// `DROP PROCEDURE IF EXISTS`
pub fn build_drop_procedure(database: &str, name: &str) -> CompileResult<SqlQuery> {
    check_identifier(IdentifierKind::Database, database)?;
    check_identifier(IdentifierKind::Procedure, name)?;
    Ok(SqlQuery::new(
        format!("DROP PROCEDURE IF EXISTS `{}`.`{}`;", database, name),
        Vec::new(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::compiler::SqlQueryParameter;
    use crate::types::{HostValue, NativeTypeId};

    fn lookup_query() -> SqlQuery {
        SqlQuery::new(
            "SELECT `ID`\nFROM `app`.`users`\nWHERE (`NAME` = @Name)\nLIMIT @Count;".to_string(),
            vec![
                SqlQueryParameter::for_native_type("Name", NativeTypeId::VarBinary, Some(64)).unwrap(),
                SqlQueryParameter::for_host_type("Count", i32::HOST_TYPE, None).unwrap(),
            ],
        )
    }

    #[test]
    fn test_create_procedure() {
        let proc = build_create_procedure("app", "find_user", &lookup_query(), false).unwrap();
        assert_eq!(
            proc.text(),
            "CREATE PROCEDURE `app`.`find_user`(\n\
             \tIN `p_Name` varbinary(64),\n\
             \tIN `p_Count` int\n\
             )\n\
             BEGIN\n\
             \tSELECT `ID`\n\
             \tFROM `app`.`users`\n\
             \tWHERE (`NAME` = `p_Name`)\n\
             \tLIMIT `p_Count`;\n\
             END;"
        );
        assert_eq!(proc.parameters(), lookup_query().parameters());
    }

    #[test]
    fn test_alternate_delimiter() {
        let proc = build_create_procedure("app", "find_user", &lookup_query(), true).unwrap();
        assert!(proc.text().starts_with("DELIMITER $$\nCREATE PROCEDURE"));
        assert!(proc.text().ends_with("END$$\nDELIMITER ;"));
    }

    #[test]
    fn test_no_parameters() {
        let q = SqlQuery::new("SELECT 1;".to_string(), Vec::new());
        let proc = build_create_procedure("app", "one", &q, false).unwrap();
        assert_eq!(proc.text(), "CREATE PROCEDURE `app`.`one`()\nBEGIN\n\tSELECT 1;\nEND;");
    }

    #[test]
    fn test_unbound_placeholder() {
        let q = SqlQuery::new("SELECT @Missing;".to_string(), Vec::new());
        assert_eq!(
            build_create_procedure("app", "p", &q, false),
            Err(CompileError::UnknownParameter("Missing".to_string()))
        );
    }

    #[test]
    fn test_drop_procedure() {
        let q = build_drop_procedure("app", "find_user").unwrap();
        assert_eq!(q.text(), "DROP PROCEDURE IF EXISTS `app`.`find_user`;");
        assert!(build_drop_procedure("app", "find user").is_err());
    }
}
