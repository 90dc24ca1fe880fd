//! Lowering of parsed SQL into memory backend commands.
//!
//! Text is parsed with `sqlparser` using the PostgreSQL dialect. Identifiers
//! follow PostgreSQL rules: unquoted names fold to lowercase, double-quoted
//! names keep their case.

use std::cmp::Ordering;

use sqlparser::ast;
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

use crate::error::BackendError;

fn syntax_error(message: impl std::fmt::Display) -> BackendError {
    BackendError::QueryError {
        message: format!("syntax error: {message}"),
    }
}

fn unsupported(what: impl std::fmt::Display) -> BackendError {
    BackendError::QueryError {
        message: format!("not supported by the memory backend: {what}"),
    }
}

/// A possibly schema-qualified relation name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct QualifiedName {
    pub schema: Option<String>,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Comparison {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl Comparison {
    fn from_operator(op: &ast::BinaryOperator) -> Option<Self> {
        Some(match op {
            ast::BinaryOperator::Eq => Comparison::Eq,
            ast::BinaryOperator::NotEq => Comparison::NotEq,
            ast::BinaryOperator::Lt => Comparison::Lt,
            ast::BinaryOperator::LtEq => Comparison::LtEq,
            ast::BinaryOperator::Gt => Comparison::Gt,
            ast::BinaryOperator::GtEq => Comparison::GtEq,
            _ => return None,
        })
    }

    /// The same comparison with its operands swapped.
    fn flipped(self) -> Self {
        match self {
            Comparison::Lt => Comparison::Gt,
            Comparison::LtEq => Comparison::GtEq,
            Comparison::Gt => Comparison::Lt,
            Comparison::GtEq => Comparison::LtEq,
            other => other,
        }
    }

    fn holds(self, ordering: Ordering) -> bool {
        match self {
            Comparison::Eq => ordering == Ordering::Equal,
            Comparison::NotEq => ordering != Ordering::Equal,
            Comparison::Lt => ordering == Ordering::Less,
            Comparison::LtEq => ordering != Ordering::Greater,
            Comparison::Gt => ordering == Ordering::Greater,
            Comparison::GtEq => ordering != Ordering::Less,
        }
    }
}

/// Compares two cell values, numerically when both parse as numbers.
pub(crate) fn compare_values(left: &str, right: &str) -> Ordering {
    match (left.parse::<f64>(), right.parse::<f64>()) {
        (Ok(l), Ok(r)) => l.partial_cmp(&r).unwrap_or(Ordering::Equal),
        _ => left.cmp(right),
    }
}

/// A `WHERE` clause over a single table.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Predicate {
    Compare {
        column: String,
        op: Comparison,
        value: Option<String>,
    },
    Null {
        column: String,
        negated: bool,
    },
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
}

impl Predicate {
    /// Every column the predicate reads.
    pub fn columns(&self) -> Vec<&str> {
        match self {
            Predicate::Compare { column, .. } | Predicate::Null { column, .. } => {
                vec![column.as_str()]
            }
            Predicate::And(left, right) | Predicate::Or(left, right) => {
                let mut columns = left.columns();
                columns.extend(right.columns());
                columns
            }
        }
    }

    /// Evaluates against a row. Comparisons involving NULL are false.
    pub fn evaluate(&self, columns: &[String], row: &[Option<String>]) -> bool {
        let cell = |name: &str| {
            columns
                .iter()
                .position(|c| c == name)
                .and_then(|idx| row[idx].as_deref())
        };
        match self {
            Predicate::Compare { column, op, value } => match (cell(column), value) {
                (Some(left), Some(right)) => op.holds(compare_values(left, right)),
                _ => false,
            },
            Predicate::Null { column, negated } => cell(column).is_none() != *negated,
            Predicate::And(left, right) => {
                left.evaluate(columns, row) && right.evaluate(columns, row)
            }
            Predicate::Or(left, right) => left.evaluate(columns, row) || right.evaluate(columns, row),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Projection {
    All,
    /// `COUNT(*)` under the given label.
    Count(String),
    /// Source column and output label pairs.
    Columns(Vec<(String, String)>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SortKey {
    pub column: String,
    pub descending: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Select {
    pub table: QualifiedName,
    pub projection: Projection,
    pub filter: Option<Predicate>,
    pub order_by: Vec<SortKey>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Command {
    CreateSchema {
        name: String,
        if_not_exists: bool,
    },
    DropSchema {
        name: String,
        if_exists: bool,
        cascade: bool,
    },
    CreateTable {
        table: QualifiedName,
        if_not_exists: bool,
        columns: Vec<String>,
    },
    DropTable {
        table: QualifiedName,
        if_exists: bool,
    },
    CreateIndex {
        name: String,
        if_not_exists: bool,
        table: QualifiedName,
    },
    Insert {
        table: QualifiedName,
        columns: Option<Vec<String>>,
        rows: Vec<Vec<Option<String>>>,
    },
    Select(Select),
    /// `SELECT` of literals without `FROM`, as label and value pairs.
    SelectValues(Vec<(String, Option<String>)>),
    Update {
        table: QualifiedName,
        assignments: Vec<(String, Option<String>)>,
        filter: Option<Predicate>,
    },
    Delete {
        table: QualifiedName,
        filter: Option<Predicate>,
    },
    SetSearchPath(Vec<String>),
    ResetSearchPath,
    ShowSearchPath,
    SetOther,
    Begin,
    Commit,
    Rollback,
}

/// Parses SQL text into commands, one per statement.
pub(crate) fn parse(sql: &str) -> Result<Vec<Command>, BackendError> {
    let statements = Parser::parse_sql(&PostgreSqlDialect {}, sql).map_err(syntax_error)?;
    if statements.is_empty() {
        return Err(syntax_error("empty statement"));
    }
    statements.iter().map(lower).collect()
}

fn ident(ident: &ast::Ident) -> String {
    if ident.quote_style.is_some() {
        ident.value.clone()
    } else {
        ident.value.to_ascii_lowercase()
    }
}

fn name_parts(name: &ast::ObjectName) -> Result<Vec<String>, BackendError> {
    name.0
        .iter()
        .map(|part| {
            part.as_ident()
                .map(ident)
                .ok_or_else(|| unsupported(format!("object name {name}")))
        })
        .collect()
}

fn qualified(name: &ast::ObjectName) -> Result<QualifiedName, BackendError> {
    let mut parts = name_parts(name)?;
    match parts.len() {
        1 => Ok(QualifiedName {
            schema: None,
            name: parts.remove(0),
        }),
        2 => {
            let name = parts.remove(1);
            Ok(QualifiedName {
                schema: Some(parts.remove(0)),
                name,
            })
        }
        _ => Err(unsupported(format!("object name {name}"))),
    }
}

fn unqualified(name: &ast::ObjectName) -> Result<String, BackendError> {
    let mut parts = name_parts(name)?;
    if parts.len() != 1 {
        return Err(unsupported(format!("qualified name {name}")));
    }
    Ok(parts.remove(0))
}

fn column(expr: &ast::Expr) -> Option<String> {
    match expr {
        ast::Expr::Identifier(id) => Some(ident(id)),
        ast::Expr::CompoundIdentifier(ids) => ids.last().map(ident),
        ast::Expr::Nested(inner) => column(inner),
        _ => None,
    }
}

fn literal(expr: &ast::Expr) -> Result<Option<String>, BackendError> {
    match expr {
        ast::Expr::Value(value) => match &value.value {
            ast::Value::Null => Ok(None),
            ast::Value::Number(raw, _) => Ok(Some(raw.clone())),
            ast::Value::SingleQuotedString(s) | ast::Value::EscapedStringLiteral(s) => {
                Ok(Some(s.clone()))
            }
            ast::Value::DollarQuotedString(s) => Ok(Some(s.value.clone())),
            ast::Value::Boolean(b) => Ok(Some(if *b { "t" } else { "f" }.to_string())),
            other => Err(unsupported(format!("value {other}"))),
        },
        ast::Expr::UnaryOp {
            op: ast::UnaryOperator::Minus,
            expr: inner,
        } => match literal(inner)? {
            Some(value) => Ok(Some(format!("-{value}"))),
            None => Ok(None),
        },
        ast::Expr::Nested(inner) => literal(inner),
        ast::Expr::Cast { expr: inner, .. } => literal(inner),
        other => Err(unsupported(format!("expression {other}"))),
    }
}

fn predicate(expr: &ast::Expr) -> Result<Predicate, BackendError> {
    match expr {
        ast::Expr::Nested(inner) => predicate(inner),
        ast::Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::And,
            right,
        } => Ok(Predicate::And(
            Box::new(predicate(left)?),
            Box::new(predicate(right)?),
        )),
        ast::Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Or,
            right,
        } => Ok(Predicate::Or(
            Box::new(predicate(left)?),
            Box::new(predicate(right)?),
        )),
        ast::Expr::BinaryOp { left, op, right } => {
            let comparison =
                Comparison::from_operator(op).ok_or_else(|| unsupported(format!("operator {op}")))?;
            if let Some(column) = column(left) {
                Ok(Predicate::Compare {
                    column,
                    op: comparison,
                    value: literal(right)?,
                })
            } else if let Some(column) = column(right) {
                Ok(Predicate::Compare {
                    column,
                    op: comparison.flipped(),
                    value: literal(left)?,
                })
            } else {
                Err(unsupported(format!("condition {expr}")))
            }
        }
        ast::Expr::IsNull(inner) | ast::Expr::IsNotNull(inner) => Ok(Predicate::Null {
            column: column(inner).ok_or_else(|| unsupported(format!("condition {expr}")))?,
            negated: matches!(expr, ast::Expr::IsNotNull(_)),
        }),
        other => Err(unsupported(format!("condition {other}"))),
    }
}

fn filter(selection: Option<&ast::Expr>) -> Result<Option<Predicate>, BackendError> {
    selection.map(predicate).transpose()
}

fn relation(table: &ast::TableWithJoins) -> Result<QualifiedName, BackendError> {
    if !table.joins.is_empty() {
        return Err(unsupported("joins"));
    }
    let ast::TableFactor::Table { name, .. } = &table.relation else {
        return Err(unsupported(format!("relation {}", table.relation)));
    };
    qualified(name)
}

fn is_count_star(expr: &ast::Expr) -> bool {
    let ast::Expr::Function(function) = expr else {
        return false;
    };
    let named_count = function
        .name
        .0
        .last()
        .and_then(|part| part.as_ident())
        .is_some_and(|id| id.value.eq_ignore_ascii_case("count"));
    let star = match &function.args {
        ast::FunctionArguments::List(list) => matches!(
            list.args.as_slice(),
            [ast::FunctionArg::Unnamed(ast::FunctionArgExpr::Wildcard)]
        ),
        _ => false,
    };
    named_count && star
}

fn projection(items: &[ast::SelectItem]) -> Result<Projection, BackendError> {
    match items {
        [ast::SelectItem::Wildcard(_)] => return Ok(Projection::All),
        [ast::SelectItem::UnnamedExpr(expr)] if is_count_star(expr) => {
            return Ok(Projection::Count("count".to_string()));
        }
        [ast::SelectItem::ExprWithAlias { expr, alias }] if is_count_star(expr) => {
            return Ok(Projection::Count(ident(alias)));
        }
        _ => {}
    }

    items
        .iter()
        .map(|item| {
            let (expr, alias) = match item {
                ast::SelectItem::UnnamedExpr(expr) => (expr, None),
                ast::SelectItem::ExprWithAlias { expr, alias } => (expr, Some(ident(alias))),
                other => return Err(unsupported(format!("select item {other}"))),
            };
            let source = column(expr).ok_or_else(|| unsupported(format!("select item {expr}")))?;
            let label = alias.unwrap_or_else(|| source.clone());
            Ok((source, label))
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Projection::Columns)
}

fn sort_keys(order_by: Option<&ast::OrderBy>) -> Result<Vec<SortKey>, BackendError> {
    let Some(order_by) = order_by else {
        return Ok(Vec::new());
    };
    let ast::OrderByKind::Expressions(expressions) = &order_by.kind else {
        return Err(unsupported(format!("{order_by}")));
    };
    expressions
        .iter()
        .map(|key| {
            Ok(SortKey {
                column: column(&key.expr)
                    .ok_or_else(|| unsupported(format!("sort key {}", key.expr)))?,
                descending: key.options.asc == Some(false),
            })
        })
        .collect()
}

fn limit(clause: Option<&ast::LimitClause>) -> Result<Option<usize>, BackendError> {
    let Some(clause) = clause else {
        return Ok(None);
    };
    let ast::LimitClause::LimitOffset {
        limit: Some(expr),
        offset: None,
        ..
    } = clause
    else {
        return Err(unsupported("OFFSET"));
    };
    let value = literal(expr)?.ok_or_else(|| unsupported("LIMIT NULL"))?;
    value
        .parse()
        .map(Some)
        .map_err(|_| syntax_error(format!("invalid LIMIT {value}")))
}

fn query(query: &ast::Query) -> Result<Command, BackendError> {
    let ast::SetExpr::Select(select) = query.body.as_ref() else {
        return Err(unsupported(format!("query {}", query.body)));
    };

    if select.from.is_empty() {
        let values = select
            .projection
            .iter()
            .map(|item| match item {
                ast::SelectItem::UnnamedExpr(expr) => Ok(("?column?".to_string(), literal(expr)?)),
                ast::SelectItem::ExprWithAlias { expr, alias } => Ok((ident(alias), literal(expr)?)),
                other => Err(unsupported(format!("select item {other}"))),
            })
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(Command::SelectValues(values));
    }

    let [from] = select.from.as_slice() else {
        return Err(unsupported("several relations in FROM"));
    };
    Ok(Command::Select(Select {
        table: relation(from)?,
        projection: projection(&select.projection)?,
        filter: filter(select.selection.as_ref())?,
        order_by: sort_keys(query.order_by.as_ref())?,
        limit: limit(query.limit_clause.as_ref())?,
    }))
}

fn insert(insert: &ast::Insert) -> Result<Command, BackendError> {
    let ast::TableObject::TableName(name) = &insert.table else {
        return Err(unsupported("INSERT into a table function"));
    };
    let source = insert
        .source
        .as_ref()
        .ok_or_else(|| unsupported("INSERT without VALUES"))?;
    let ast::SetExpr::Values(values) = source.body.as_ref() else {
        return Err(unsupported("INSERT from a query"));
    };
    let rows = values
        .rows
        .iter()
        .map(|row| row.iter().map(literal).collect::<Result<Vec<_>, _>>())
        .collect::<Result<Vec<_>, _>>()?;
    let columns = if insert.columns.is_empty() {
        None
    } else {
        Some(insert.columns.iter().map(ident).collect())
    };
    Ok(Command::Insert {
        table: qualified(name)?,
        columns,
        rows,
    })
}

fn set(set: &ast::Set) -> Result<Command, BackendError> {
    let ast::Set::SingleAssignment {
        variable, values, ..
    } = set
    else {
        return Ok(Command::SetOther);
    };
    let is_search_path = matches!(
        name_parts(variable)?.as_slice(),
        [name] if name == "search_path"
    );
    if !is_search_path {
        return Ok(Command::SetOther);
    }

    match values.as_slice() {
        [ast::Expr::Identifier(id)]
            if id.quote_style.is_none() && id.value.eq_ignore_ascii_case("default") =>
        {
            return Ok(Command::ResetSearchPath);
        }
        _ => {}
    }

    values
        .iter()
        .map(|value| match value {
            ast::Expr::Identifier(id) => Ok(ident(id)),
            other => literal(other)?.ok_or_else(|| unsupported("NULL in search_path")),
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Command::SetSearchPath)
}

fn lower(statement: &ast::Statement) -> Result<Command, BackendError> {
    match statement {
        ast::Statement::CreateSchema {
            schema_name,
            if_not_exists,
            ..
        } => {
            let ast::SchemaName::Simple(name) = schema_name else {
                return Err(unsupported(format!("schema {schema_name}")));
            };
            Ok(Command::CreateSchema {
                name: unqualified(name)?,
                if_not_exists: *if_not_exists,
            })
        }
        ast::Statement::CreateTable(create) => Ok(Command::CreateTable {
            table: qualified(&create.name)?,
            if_not_exists: create.if_not_exists,
            columns: create.columns.iter().map(|c| ident(&c.name)).collect(),
        }),
        ast::Statement::CreateIndex(create) => {
            let table = qualified(&create.table_name)?;
            let name = match &create.name {
                Some(name) => unqualified(name)?,
                None => format!("{}_idx", table.name),
            };
            Ok(Command::CreateIndex {
                name,
                if_not_exists: create.if_not_exists,
                table,
            })
        }
        ast::Statement::Drop {
            object_type,
            if_exists,
            names,
            cascade,
            ..
        } => {
            let [name] = names.as_slice() else {
                return Err(unsupported("DROP of several objects"));
            };
            match object_type {
                ast::ObjectType::Schema => Ok(Command::DropSchema {
                    name: unqualified(name)?,
                    if_exists: *if_exists,
                    cascade: *cascade,
                }),
                ast::ObjectType::Table => Ok(Command::DropTable {
                    table: qualified(name)?,
                    if_exists: *if_exists,
                }),
                other => Err(unsupported(format!("DROP {other}"))),
            }
        }
        ast::Statement::Insert(statement) => insert(statement),
        ast::Statement::Query(statement) => query(statement),
        ast::Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => {
            let assignments = assignments
                .iter()
                .map(|assignment| {
                    let ast::AssignmentTarget::ColumnName(name) = &assignment.target else {
                        return Err(unsupported(format!("assignment {assignment}")));
                    };
                    let column = name_parts(name)?
                        .pop()
                        .ok_or_else(|| unsupported(format!("assignment {assignment}")))?;
                    Ok((column, literal(&assignment.value)?))
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Command::Update {
                table: relation(table)?,
                assignments,
                filter: filter(selection.as_ref())?,
            })
        }
        ast::Statement::Delete(delete) => {
            let tables = match &delete.from {
                ast::FromTable::WithFromKeyword(tables) | ast::FromTable::WithoutKeyword(tables) => {
                    tables
                }
            };
            let [table] = tables.as_slice() else {
                return Err(unsupported("DELETE from several tables"));
            };
            Ok(Command::Delete {
                table: relation(table)?,
                filter: filter(delete.selection.as_ref())?,
            })
        }
        ast::Statement::Set(statement) => set(statement),
        ast::Statement::ShowVariable { variable } => match variable.as_slice() {
            [name] if ident(name) == "search_path" => Ok(Command::ShowSearchPath),
            _ => Err(unsupported(statement)),
        },
        ast::Statement::StartTransaction { .. } => Ok(Command::Begin),
        ast::Statement::Commit { .. } => Ok(Command::Commit),
        ast::Statement::Rollback { savepoint: None, .. } => Ok(Command::Rollback),
        other => Err(unsupported(other)),
    }
}
