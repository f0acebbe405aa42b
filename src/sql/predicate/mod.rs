//! Row-filter predicates
//!
//! A filter is a boolean expression over one row plus up to five bound
//! parameters. It is held as an AST and compiled to an SQL fragment that
//! can follow `WHERE`:
//!
//! - `row.Prop` -> backtick-quoted column name
//! - parameter `x` -> `@x`
//! - `Contains/StartsWith/EndsWith` -> `LIKE CONCAT(...)`
//! - `Equals(x, ignore case)` -> `LOWER(a) = LOWER(b)`
//! - comparisons against `null` -> `IS NULL` / `IS NOT NULL`, null kept on the right
//! - `DateTime.Now/UtcNow` -> `NOW()` / `UTC_TIMESTAMP()`
//!
//! Literal text never reaches the SQL: values must be bound as parameters.

mod parse;

use std::fmt::Write;

use crate::catalog::names::{is_valid_variable_name, IdentifierKind};
use crate::sql::compiler::{column_ref, is_reserved_parameter_name};
use crate::sql::error::{CompileError, CompileResult};
use crate::sql::model::RowModel;
use crate::types::{HostType, HostValue};

/// Literal value
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    /// Never compiled; present so callers get `UnsafeExpression` instead of a silent drop
    String(String),
}

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl CompareOp {
    fn as_sql(self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::NotEq => "!=",
            CompareOp::Lt => "<",
            CompareOp::LtEq => "<=",
            CompareOp::Gt => ">",
            CompareOp::GtEq => ">=",
        }
    }

    /// Operator with operands swapped (`a < b` == `b > a`)
    fn mirrored(self) -> Self {
        match self {
            CompareOp::Lt => CompareOp::Gt,
            CompareOp::LtEq => CompareOp::GtEq,
            CompareOp::Gt => CompareOp::Lt,
            CompareOp::GtEq => CompareOp::LtEq,
            other => other,
        }
    }
}

/// Logical connectives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

/// Which clock a now-accessor reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Clock {
    Local,
    Utc,
}

/// Methods callable on a row value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Contains,
    StartsWith,
    EndsWith,
    Equals { ignore_case: bool },
    ToUpper,
    ToLower,
    /// Nullable has-value check
    HasValue,
    /// Nullable unwrap; compiles to the receiver itself
    Value,
}

impl Method {
    fn arity(self) -> usize {
        match self {
            Method::Contains | Method::StartsWith | Method::EndsWith | Method::Equals { .. } => 1,
            Method::ToUpper | Method::ToLower | Method::HasValue | Method::Value => 0,
        }
    }
}

/// Filter expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Row property reference
    Field(String),
    /// Bound parameter reference
    Param(String),
    Literal(Literal),
    /// Server clock
    Now(Clock),
    Compare {
        left: Box<Expr>,
        op: CompareOp,
        right: Box<Expr>,
    },
    Logical { op: LogicalOp, operands: Vec<Expr> },
    Not(Box<Expr>),
    Call {
        receiver: Box<Expr>,
        method: Method,
        args: Vec<Expr>,
    },
}

/// Row property reference
pub fn field(property: impl Into<String>) -> Expr {
    Expr::Field(property.into())
}

/// Bound parameter reference
pub fn param(name: impl Into<String>) -> Expr {
    Expr::Param(name.into())
}

impl From<bool> for Expr {
    fn from(v: bool) -> Self {
        Expr::Literal(Literal::Boolean(v))
    }
}

impl From<i64> for Expr {
    fn from(v: i64) -> Self {
        Expr::Literal(Literal::Integer(v))
    }
}

impl From<i32> for Expr {
    fn from(v: i32) -> Self {
        Expr::Literal(Literal::Integer(v.into()))
    }
}

impl From<f64> for Expr {
    fn from(v: f64) -> Self {
        Expr::Literal(Literal::Float(v))
    }
}

impl Expr {
    /// `null` literal
    pub fn null() -> Self {
        Expr::Literal(Literal::Null)
    }

    /// Server local time
    pub fn now() -> Self {
        Expr::Now(Clock::Local)
    }

    /// Server UTC time
    pub fn utc_now() -> Self {
        Expr::Now(Clock::Utc)
    }

    fn compare(self, op: CompareOp, rhs: impl Into<Expr>) -> Self {
        Expr::Compare {
            left: Box::new(self),
            op,
            right: Box::new(rhs.into()),
        }
    }

    pub fn equal(self, rhs: impl Into<Expr>) -> Self {
        self.compare(CompareOp::Eq, rhs)
    }

    pub fn not_equal(self, rhs: impl Into<Expr>) -> Self {
        self.compare(CompareOp::NotEq, rhs)
    }

    pub fn lt(self, rhs: impl Into<Expr>) -> Self {
        self.compare(CompareOp::Lt, rhs)
    }

    pub fn le(self, rhs: impl Into<Expr>) -> Self {
        self.compare(CompareOp::LtEq, rhs)
    }

    pub fn gt(self, rhs: impl Into<Expr>) -> Self {
        self.compare(CompareOp::Gt, rhs)
    }

    pub fn ge(self, rhs: impl Into<Expr>) -> Self {
        self.compare(CompareOp::GtEq, rhs)
    }

    pub fn is_null(self) -> Self {
        self.compare(CompareOp::Eq, Expr::null())
    }

    pub fn is_not_null(self) -> Self {
        self.compare(CompareOp::NotEq, Expr::null())
    }

    fn logical(self, op: LogicalOp, rhs: Expr) -> Self {
        match self {
            // flatten chains of the same connective
            Expr::Logical {
                op: existing,
                mut operands,
            } if existing == op => {
                operands.push(rhs);
                Expr::Logical { op, operands }
            }
            lhs => Expr::Logical {
                op,
                operands: vec![lhs, rhs],
            },
        }
    }

    pub fn and(self, rhs: Expr) -> Self {
        self.logical(LogicalOp::And, rhs)
    }

    pub fn or(self, rhs: Expr) -> Self {
        self.logical(LogicalOp::Or, rhs)
    }

    /// Logical NOT
    pub fn negate(self) -> Self {
        Expr::Not(Box::new(self))
    }

    fn call(self, method: Method, args: Vec<Expr>) -> Self {
        Expr::Call {
            receiver: Box::new(self),
            method,
            args,
        }
    }

    pub fn contains(self, arg: impl Into<Expr>) -> Self {
        self.call(Method::Contains, vec![arg.into()])
    }

    pub fn starts_with(self, arg: impl Into<Expr>) -> Self {
        self.call(Method::StartsWith, vec![arg.into()])
    }

    pub fn ends_with(self, arg: impl Into<Expr>) -> Self {
        self.call(Method::EndsWith, vec![arg.into()])
    }

    pub fn equals(self, arg: impl Into<Expr>) -> Self {
        self.call(Method::Equals { ignore_case: false }, vec![arg.into()])
    }

    pub fn equals_ignore_case(self, arg: impl Into<Expr>) -> Self {
        self.call(Method::Equals { ignore_case: true }, vec![arg.into()])
    }

    pub fn to_upper(self) -> Self {
        self.call(Method::ToUpper, vec![])
    }

    pub fn to_lower(self) -> Self {
        self.call(Method::ToLower, vec![])
    }

    pub fn has_value(self) -> Self {
        self.call(Method::HasValue, vec![])
    }

    pub fn value(self) -> Self {
        self.call(Method::Value, vec![])
    }

    /// Visit this node and all children, depth first. Fails past `Filter::MAX_DEPTH`.
    fn walk<'a>(
        &'a self,
        depth: usize,
        visit: &mut dyn FnMut(&'a Expr) -> CompileResult<()>,
    ) -> CompileResult<()> {
        if depth > Filter::MAX_DEPTH {
            return Err(CompileError::InvalidExpression(format!(
                "expression nested deeper than {} levels",
                Filter::MAX_DEPTH
            )));
        }
        visit(self)?;
        let depth = depth + 1;
        match self {
            Expr::Field(_) | Expr::Param(_) | Expr::Literal(_) | Expr::Now(_) => Ok(()),
            Expr::Compare { left, right, .. } => {
                left.walk(depth, visit)?;
                right.walk(depth, visit)
            }
            Expr::Logical { operands, .. } => {
                operands.iter().try_for_each(|e| e.walk(depth, visit))
            }
            Expr::Not(inner) => inner.walk(depth, visit),
            Expr::Call { receiver, args, .. } => {
                receiver.walk(depth, visit)?;
                args.iter().try_for_each(|e| e.walk(depth, visit))
            }
        }
    }
}

impl From<&str> for Expr {
    /// A bare string is a parameter reference, never a text literal
    fn from(name: &str) -> Self {
        param(name)
    }
}

/// A bound parameter declared by a filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterParam {
    pub name: String,
    pub host_type: HostType,
}

impl FilterParam {
    pub fn new(name: impl Into<String>, host_type: HostType) -> Self {
        Self {
            name: name.into(),
            host_type,
        }
    }

    /// Parameter whose host type is that of `T`
    pub fn of<T: HostValue>(name: impl Into<String>) -> Self {
        Self::new(name, T::HOST_TYPE)
    }
}

/// A validated row filter
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    expr: Expr,
    params: Vec<FilterParam>,
}

impl Filter {
    /// Maximum number of bound parameters per filter
    pub const MAX_PARAMS: usize = 5;

    /// Maximum expression tree depth
    pub const MAX_DEPTH: usize = 256;

    /// Filter without bound parameters
    pub fn new(expr: Expr) -> CompileResult<Self> {
        Self::with_params(expr, Vec::new())
    }

    /// Filter with bound parameters.
    ///
    /// Fails on reserved or invalid parameter names, undeclared or unused
    /// parameters, text literals and nesting deeper than `MAX_DEPTH`.
    pub fn with_params(expr: Expr, params: Vec<FilterParam>) -> CompileResult<Self> {
        validate_params(&params)?;

        let mut referenced: Vec<&str> = Vec::new();
        expr.walk(0, &mut |node| match node {
            Expr::Param(name) if !params.iter().any(|p| &p.name == name) => {
                Err(CompileError::UnknownParameter(name.clone()))
            }
            Expr::Param(name) => {
                referenced.push(name);
                Ok(())
            }
            Expr::Literal(Literal::String(_)) => Err(CompileError::UnsafeExpression(
                "text literals must be bound as parameters".to_string(),
            )),
            Expr::Logical { operands, .. } if operands.is_empty() => Err(
                CompileError::InvalidExpression("logical operator without operands".to_string()),
            ),
            Expr::Call { method, args, .. } if args.len() != method.arity() => {
                Err(CompileError::InvalidExpression(format!(
                    "{:?} takes {} argument(s), got {}",
                    method,
                    method.arity(),
                    args.len()
                )))
            }
            _ => Ok(()),
        })?;

        if let Some(unused) = params.iter().find(|p| !referenced.contains(&p.name.as_str())) {
            return Err(CompileError::UnusedParameter(unused.name.clone()));
        }
        Ok(Self { expr, params })
    }

    /// Parse the lambda form, e.g. `row => row.Name.Contains(x)`
    pub fn parse(text: &str, params: Vec<FilterParam>) -> CompileResult<Self> {
        validate_params(&params)?;
        let expr = parse::parse_lambda(text, &params)?;
        Self::with_params(expr, params)
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    /// Declared parameters, in declaration order
    pub fn params(&self) -> &[FilterParam] {
        &self.params
    }

    /// Compile to an SQL boolean fragment against `model`
    pub fn to_sql(&self, model: &RowModel) -> CompileResult<String> {
        let mut out = String::new();
        emit(&self.expr, model, &mut out)?;
        Ok(out)
    }
}

/// Words the lambda form reads as literals or operators
const LAMBDA_KEYWORDS: &[&str] = &[
    "null",
    "true",
    "false",
    "DateTime",
    "DateTimeOffset",
    "AndAlso",
    "OrElse",
];

fn validate_params(params: &[FilterParam]) -> CompileResult<()> {
    if params.len() > Filter::MAX_PARAMS {
        return Err(CompileError::TooManyParameters {
            max: Filter::MAX_PARAMS,
            found: params.len(),
        });
    }
    for (i, p) in params.iter().enumerate() {
        if is_reserved_parameter_name(&p.name) {
            return Err(CompileError::ReservedParameterName(p.name.clone()));
        }
        if !is_valid_variable_name(&p.name)
            || p.name.contains('.')
            || LAMBDA_KEYWORDS.contains(&p.name.as_str())
        {
            return Err(CompileError::invalid_identifier(
                IdentifierKind::Variable,
                &p.name,
            ));
        }
        if params[..i].iter().any(|q| q.name == p.name) {
            return Err(CompileError::DuplicateParameter(p.name.clone()));
        }
    }
    Ok(())
}

fn emit(expr: &Expr, model: &RowModel, out: &mut String) -> CompileResult<()> {
    match expr {
        Expr::Field(property) => {
            let field = model
                .get_field(property)
                .ok_or_else(|| CompileError::UnknownProperty {
                    model: model.name().to_string(),
                    property: property.clone(),
                })?;
            out.push_str(&column_ref(field)?);
        }
        Expr::Param(name) => {
            write!(out, "@{}", name).ok();
        }
        Expr::Literal(lit) => emit_literal(lit, out)?,
        Expr::Now(Clock::Local) => out.push_str("NOW()"),
        Expr::Now(Clock::Utc) => out.push_str("UTC_TIMESTAMP()"),
        Expr::Compare { left, op, right } => emit_compare(left, *op, right, model, out)?,
        Expr::Logical { op, operands } => {
            let keyword = match op {
                LogicalOp::And => " AND ",
                LogicalOp::Or => " OR ",
            };
            out.push('(');
            for (i, operand) in operands.iter().enumerate() {
                if i > 0 {
                    out.push_str(keyword);
                }
                emit(operand, model, out)?;
            }
            out.push(')');
        }
        Expr::Not(inner) => {
            out.push_str("NOT ");
            emit(inner, model, out)?;
        }
        Expr::Call {
            receiver,
            method,
            args,
        } => emit_call(receiver, *method, args, model, out)?,
    }
    Ok(())
}

fn emit_literal(lit: &Literal, out: &mut String) -> CompileResult<()> {
    match lit {
        Literal::Null => out.push_str("null"),
        Literal::Boolean(b) => out.push_str(if *b { "true" } else { "false" }),
        Literal::Integer(i) => {
            write!(out, "{}", i).ok();
        }
        Literal::Float(f) if f.is_finite() => {
            write!(out, "{:?}", f).ok();
        }
        Literal::Float(f) => {
            return Err(CompileError::InvalidExpression(format!(
                "non-finite number {}",
                f
            )))
        }
        Literal::String(_) => {
            return Err(CompileError::UnsafeExpression(
                "text literals must be bound as parameters".to_string(),
            ))
        }
    }
    Ok(())
}

fn is_null(expr: &Expr) -> bool {
    matches!(expr, Expr::Literal(Literal::Null))
}

fn emit_compare(
    left: &Expr,
    op: CompareOp,
    right: &Expr,
    model: &RowModel,
    out: &mut String,
) -> CompileResult<()> {
    // null goes on the right
    let (left, op, right) = if is_null(left) && !is_null(right) {
        (right, op.mirrored(), left)
    } else {
        (left, op, right)
    };

    out.push('(');
    emit(left, model, out)?;
    match (op, is_null(right)) {
        (CompareOp::Eq, true) => out.push_str(" IS NULL"),
        (CompareOp::NotEq, true) => out.push_str(" IS NOT NULL"),
        _ => {
            write!(out, " {} ", op.as_sql()).ok();
            emit(right, model, out)?;
        }
    }
    out.push(')');
    Ok(())
}

fn emit_call(
    receiver: &Expr,
    method: Method,
    args: &[Expr],
    model: &RowModel,
    out: &mut String,
) -> CompileResult<()> {
    let mut recv = String::new();
    emit(receiver, model, &mut recv)?;

    let mut arg = String::new();
    if let Some(first) = args.first() {
        emit(first, model, &mut arg)?;
    }

    match method {
        Method::Contains => write!(out, r#"{} LIKE CONCAT("%", {}, "%")"#, recv, arg),
        Method::StartsWith => write!(out, r#"{} LIKE CONCAT({}, "%")"#, recv, arg),
        Method::EndsWith => write!(out, r#"{} LIKE CONCAT("%", {})"#, recv, arg),
        Method::Equals { ignore_case: false } => write!(out, "{} = {}", recv, arg),
        Method::Equals { ignore_case: true } => {
            write!(out, "LOWER({}) = LOWER({})", recv, arg)
        }
        Method::ToUpper => write!(out, "UPPER({})", recv),
        Method::ToLower => write!(out, "LOWER({})", recv),
        Method::HasValue => write!(out, "{} IS NOT NULL", recv),
        Method::Value => write!(out, "{}", recv),
    }
    .ok();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::model::FieldDef;

    fn model() -> RowModel {
        RowModel::new("T", "t")
            .field(FieldDef::of::<i64>("Id"))
            .field(FieldDef::of::<String>("Name"))
            .field(FieldDef::of::<Option<i32>>("Score"))
    }

    #[test]
    fn test_comparison() {
        let f = Filter::new(field("Id").gt(123)).unwrap();
        assert_eq!(f.to_sql(&model()).unwrap(), "(`ID` > 123)");
    }

    #[test]
    fn test_null_moves_right() {
        let f = Filter::new(Expr::null().not_equal(field("Name"))).unwrap();
        assert_eq!(f.to_sql(&model()).unwrap(), "(`NAME` IS NOT NULL)");

        let f = Filter::new(Expr::null().lt(field("Id"))).unwrap();
        assert_eq!(f.to_sql(&model()).unwrap(), "(`ID` > null)");
    }

    #[test]
    fn test_methods() {
        let params = vec![FilterParam::of::<String>("x")];
        let f = Filter::with_params(field("Name").starts_with("x"), params.clone()).unwrap();
        assert_eq!(f.to_sql(&model()).unwrap(), r#"`NAME` LIKE CONCAT(@x, "%")"#);

        let f = Filter::with_params(field("Name").ends_with("x"), params.clone()).unwrap();
        assert_eq!(f.to_sql(&model()).unwrap(), r#"`NAME` LIKE CONCAT("%", @x)"#);

        let f = Filter::with_params(field("Name").to_upper().equals("x"), params).unwrap();
        assert_eq!(f.to_sql(&model()).unwrap(), "UPPER(`NAME`) = @x");

        let f = Filter::new(field("Score").has_value()).unwrap();
        assert_eq!(f.to_sql(&model()).unwrap(), "`SCORE` IS NOT NULL");
    }

    #[test]
    fn test_logical_flattening() {
        let expr = field("Id")
            .gt(1)
            .and(field("Id").lt(10))
            .and(field("Score").value().ge(Expr::from(5)));
        let f = Filter::new(expr).unwrap();
        assert_eq!(
            f.to_sql(&model()).unwrap(),
            "((`ID` > 1) AND (`ID` < 10) AND (`SCORE` >= 5))"
        );
    }

    #[test]
    fn test_now_and_not() {
        let f = Filter::new(field("Id").gt(0).negate().or(field("Id").lt(Expr::utc_now()))).unwrap();
        assert_eq!(
            f.to_sql(&model()).unwrap(),
            "(NOT (`ID` > 0) OR (`ID` < UTC_TIMESTAMP()))"
        );
    }

    #[test]
    fn test_undeclared_parameter() {
        let err = Filter::new(field("Name").equal(param("y"))).unwrap_err();
        assert_eq!(err, CompileError::UnknownParameter("y".to_string()));
    }

    #[test]
    fn test_text_literal_is_unsafe() {
        let expr = field("Name").equal(Expr::Literal(Literal::String("bob".into())));
        assert!(matches!(
            Filter::new(expr),
            Err(CompileError::UnsafeExpression(_))
        ));
    }

    #[test]
    fn test_param_validation() {
        for reserved in ["Count", "ExclusiveStart", "IsAscending", "count"] {
            let params = vec![FilterParam::of::<i32>(reserved)];
            assert!(matches!(
                Filter::with_params(field("Id").equal(param(reserved)), params),
                Err(CompileError::ReservedParameterName(_))
            ));
        }

        let six: Vec<_> = (0..6).map(|i| FilterParam::of::<i32>(format!("p{}", i))).collect();
        assert!(matches!(
            Filter::with_params(field("Id").gt(0), six),
            Err(CompileError::TooManyParameters { max: 5, found: 6 })
        ));

        let dup = vec![FilterParam::of::<i32>("a"), FilterParam::of::<i64>("a")];
        assert!(matches!(
            Filter::with_params(field("Id").equal(param("a")), dup),
            Err(CompileError::DuplicateParameter(_))
        ));

        let bad = vec![FilterParam::of::<i32>("a-b")];
        assert!(matches!(
            Filter::with_params(field("Id").gt(0), bad),
            Err(CompileError::InvalidIdentifier { .. })
        ));
    }

    #[test]
    fn test_keyword_param_names_rejected() {
        for keyword in ["null", "true", "false", "DateTime", "OrElse"] {
            let params = vec![FilterParam::of::<i32>(keyword)];
            assert!(
                matches!(
                    Filter::with_params(field("Id").equal(param(keyword)), params.clone()),
                    Err(CompileError::InvalidIdentifier { .. })
                ),
                "{} accepted",
                keyword
            );
            assert!(matches!(
                Filter::parse("row => row.Id == null", params),
                Err(CompileError::InvalidIdentifier { .. })
            ));
        }
    }

    #[test]
    fn test_deep_expression_rejected() {
        let mut shallow = field("Id").gt(0);
        for _ in 0..10 {
            shallow = shallow.negate();
        }
        assert!(Filter::new(shallow).is_ok());

        let mut deep = field("Id").gt(0);
        for _ in 0..1000 {
            deep = deep.negate();
        }
        assert!(matches!(
            Filter::new(deep),
            Err(CompileError::InvalidExpression(ref m)) if m.contains("nested")
        ));
    }

    #[test]
    fn test_unknown_property() {
        let f = Filter::new(field("Missing").equal(true)).unwrap();
        assert!(matches!(
            f.to_sql(&model()),
            Err(CompileError::UnknownProperty { .. })
        ));
    }
}
