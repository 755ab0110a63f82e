//! Statement plans of the in-memory backend.
//!
//! DML and DROP go through `sqlparser` (PostgreSQL dialect); CREATE TABLE
//! is read textually since only column names, types, nullability and the
//! primary key matter here.

use super::table::{ColumnKind, MemColumn};
use crate::core::WireValue;
use crate::session::{SessionError, SessionResult};
use sqlparser::ast as sql_ast;
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

/// A value slot of a statement: a bound parameter or an inline literal.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// Zero-based parameter index (`$1` is 0).
    Param(usize),
    Literal(WireValue),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq { column: String, operand: Operand },
    In { column: String, operands: Vec<Operand> },
    And(Box<Filter>, Box<Filter>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    CountStar,
    Constant(WireValue),
    Columns(Vec<String>),
    Wildcard,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MemPlan {
    CreateTable {
        table: String,
        columns: Vec<MemColumn>,
        if_not_exists: bool,
    },
    DropTable {
        table: String,
        if_exists: bool,
    },
    Insert {
        table: String,
        columns: Option<Vec<String>>,
        rows: Vec<Vec<Operand>>,
    },
    Select {
        table: String,
        projection: Projection,
        filter: Option<Filter>,
        limit: Option<usize>,
    },
    Update {
        table: String,
        assignments: Vec<(String, Operand)>,
        filter: Option<Filter>,
    },
    Delete {
        table: String,
        filter: Option<Filter>,
    },
    Begin,
    Commit,
    Rollback,
}

impl MemPlan {
    pub fn parse(sql: &str) -> SessionResult<Self> {
        let trimmed = sql.trim().trim_end_matches(';').trim();
        let upper = trimmed.to_ascii_uppercase();
        if upper == "BEGIN" || upper == "BEGIN TRANSACTION" || upper == "START TRANSACTION" {
            return Ok(Self::Begin);
        }
        if upper == "COMMIT" || upper == "COMMIT TRANSACTION" {
            return Ok(Self::Commit);
        }
        if upper == "ROLLBACK" || upper == "ROLLBACK TRANSACTION" {
            return Ok(Self::Rollback);
        }
        if upper.starts_with("CREATE TABLE") {
            return parse_create_table(trimmed);
        }

        let mut statements = Parser::parse_sql(&PostgreSqlDialect {}, trimmed)
            .map_err(|e| SessionError::Rejected(format!("syntax error: {}", e)))?;
        if statements.len() != 1 {
            return Err(SessionError::Rejected(format!(
                "expected one statement, got {}",
                statements.len()
            )));
        }

        match statements.remove(0) {
            sql_ast::Statement::Drop {
                object_type,
                names,
                if_exists,
                ..
            } => {
                if !matches!(object_type, sql_ast::ObjectType::Table) || names.len() != 1 {
                    return Err(SessionError::Rejected("only DROP TABLE of one table is supported".into()));
                }
                Ok(Self::DropTable {
                    table: object_name(&names[0])?,
                    if_exists,
                })
            }
            sql_ast::Statement::Insert(insert) => {
                let table = trim_sql_identifier(&insert.table.to_string());
                let columns = if insert.columns.is_empty() {
                    None
                } else {
                    Some(insert.columns.into_iter().map(|id| id.value).collect())
                };
                let Some(source) = insert.source else {
                    return Err(SessionError::Rejected("INSERT needs a VALUES clause".into()));
                };
                let sql_ast::SetExpr::Values(values) = *source.body else {
                    return Err(SessionError::Rejected("only INSERT ... VALUES is supported".into()));
                };
                let rows = values
                    .rows
                    .into_iter()
                    .map(|row| row.into_iter().map(operand).collect::<SessionResult<Vec<_>>>())
                    .collect::<SessionResult<Vec<_>>>()?;
                Ok(Self::Insert {
                    table,
                    columns,
                    rows,
                })
            }
            sql_ast::Statement::Query(query) => parse_select(*query),
            sql_ast::Statement::Update {
                table,
                assignments,
                selection,
                ..
            } => {
                let table = table_factor_name(&table.relation)?;
                let assignments = assignments
                    .into_iter()
                    .map(|assign| {
                        let column = match &assign.target {
                            sql_ast::AssignmentTarget::ColumnName(name) => object_name(name)?,
                            _ => {
                                return Err(SessionError::Rejected(
                                    "only simple column names can be assigned".into(),
                                ));
                            }
                        };
                        Ok((column, operand(assign.value)?))
                    })
                    .collect::<SessionResult<Vec<_>>>()?;
                Ok(Self::Update {
                    table,
                    assignments,
                    filter: selection.map(filter).transpose()?,
                })
            }
            sql_ast::Statement::Delete(delete) => {
                let tables = match &delete.from {
                    sql_ast::FromTable::WithFromKeyword(tables)
                    | sql_ast::FromTable::WithoutKeyword(tables) => tables,
                };
                let [from] = tables.as_slice() else {
                    return Err(SessionError::Rejected("DELETE needs exactly one table".into()));
                };
                Ok(Self::Delete {
                    table: table_factor_name(&from.relation)?,
                    filter: delete.selection.map(filter).transpose()?,
                })
            }
            other => Err(SessionError::Rejected(format!(
                "statement not supported: {}",
                other
            ))),
        }
    }

    /// Name of the table the statement touches, if any.
    pub fn table(&self) -> Option<&str> {
        match self {
            Self::CreateTable { table, .. }
            | Self::DropTable { table, .. }
            | Self::Insert { table, .. }
            | Self::Select { table, .. }
            | Self::Update { table, .. }
            | Self::Delete { table, .. } => Some(table),
            Self::Begin | Self::Commit | Self::Rollback => None,
        }
    }
}

fn parse_select(query: sql_ast::Query) -> SessionResult<MemPlan> {
    let limit = limit_of(&query.limit_clause)?;
    let sql_ast::SetExpr::Select(select) = *query.body else {
        return Err(SessionError::Rejected("only plain SELECT is supported".into()));
    };

    let [from] = select.from.as_slice() else {
        return Err(SessionError::Rejected("SELECT needs exactly one table".into()));
    };
    if !from.joins.is_empty() {
        return Err(SessionError::Rejected("joins are not supported".into()));
    }
    let table = table_factor_name(&from.relation)?;

    let projection = match select.projection.as_slice() {
        [sql_ast::SelectItem::Wildcard(_)] => Projection::Wildcard,
        [sql_ast::SelectItem::UnnamedExpr(expr)] if expr.to_string().eq_ignore_ascii_case("COUNT(*)") => {
            Projection::CountStar
        }
        [sql_ast::SelectItem::UnnamedExpr(sql_ast::Expr::Value(value))] => {
            match literal(value.value.clone())? {
                Operand::Literal(value) => Projection::Constant(value),
                Operand::Param(_) => {
                    return Err(SessionError::Rejected("parameters are not allowed in the projection".into()));
                }
            }
        }
        items => Projection::Columns(
            items
                .iter()
                .map(|item| match item {
                    sql_ast::SelectItem::UnnamedExpr(expr) => column_name(expr),
                    other => Err(SessionError::Rejected(format!(
                        "unsupported select item: {}",
                        other
                    ))),
                })
                .collect::<SessionResult<Vec<_>>>()?,
        ),
    };

    Ok(MemPlan::Select {
        table,
        projection,
        filter: select.selection.clone().map(filter).transpose()?,
        limit,
    })
}

fn limit_of(clause: &Option<sql_ast::LimitClause>) -> SessionResult<Option<usize>> {
    let Some(clause) = clause else {
        return Ok(None);
    };
    match clause {
        sql_ast::LimitClause::LimitOffset {
            limit: Some(sql_ast::Expr::Value(value)),
            ..
        } => match &value.value {
            sql_ast::Value::Number(n, _) => n
                .parse::<usize>()
                .map(Some)
                .map_err(|_| SessionError::Rejected(format!("invalid LIMIT {}", n))),
            other => Err(SessionError::Rejected(format!("unsupported LIMIT {}", other))),
        },
        sql_ast::LimitClause::LimitOffset { limit: None, .. } => Ok(None),
        _ => Err(SessionError::Rejected("only numeric LIMIT is supported".into())),
    }
}

fn filter(expr: sql_ast::Expr) -> SessionResult<Filter> {
    match expr {
        sql_ast::Expr::BinaryOp {
            left,
            op: sql_ast::BinaryOperator::And,
            right,
        } => Ok(Filter::And(Box::new(filter(*left)?), Box::new(filter(*right)?))),
        sql_ast::Expr::BinaryOp {
            left,
            op: sql_ast::BinaryOperator::Eq,
            right,
        } => Ok(Filter::Eq {
            column: column_name(&left)?,
            operand: operand(*right)?,
        }),
        sql_ast::Expr::InList {
            expr,
            list,
            negated: false,
        } => Ok(Filter::In {
            column: column_name(&expr)?,
            operands: list.into_iter().map(operand).collect::<SessionResult<Vec<_>>>()?,
        }),
        sql_ast::Expr::Nested(inner) => filter(*inner),
        other => Err(SessionError::Rejected(format!(
            "unsupported condition: {}",
            other
        ))),
    }
}

fn operand(expr: sql_ast::Expr) -> SessionResult<Operand> {
    match expr {
        sql_ast::Expr::Value(value) => literal(value.value),
        sql_ast::Expr::Nested(inner) => operand(*inner),
        sql_ast::Expr::UnaryOp {
            op: sql_ast::UnaryOperator::Minus,
            expr,
        } => match operand(*expr)? {
            Operand::Literal(WireValue::Int64(n)) => Ok(Operand::Literal(WireValue::Int64(-n))),
            _ => Err(SessionError::Rejected("unary minus needs a numeric literal".into())),
        },
        other => Err(SessionError::Rejected(format!(
            "unsupported value expression: {}",
            other
        ))),
    }
}

fn literal(value: sql_ast::Value) -> SessionResult<Operand> {
    match value {
        sql_ast::Value::Placeholder(p) => p
            .strip_prefix('$')
            .and_then(|n| n.parse::<usize>().ok())
            .filter(|n| *n > 0)
            .map(|n| Operand::Param(n - 1))
            .ok_or_else(|| SessionError::Rejected(format!("invalid placeholder '{}'", p))),
        sql_ast::Value::Number(n, _) => n
            .parse::<i64>()
            .map(|v| Operand::Literal(WireValue::Int64(v)))
            .map_err(|_| SessionError::Rejected(format!("unsupported numeric literal {}", n))),
        sql_ast::Value::SingleQuotedString(s) => Ok(Operand::Literal(WireValue::Utf8(s))),
        sql_ast::Value::Boolean(b) => Ok(Operand::Literal(WireValue::Bool(b))),
        sql_ast::Value::Null => Ok(Operand::Literal(WireValue::Null)),
        other => Err(SessionError::Rejected(format!("unsupported literal {}", other))),
    }
}

fn column_name(expr: &sql_ast::Expr) -> SessionResult<String> {
    match expr {
        sql_ast::Expr::Identifier(ident) => Ok(ident.value.clone()),
        sql_ast::Expr::CompoundIdentifier(idents) => idents
            .last()
            .map(|ident| ident.value.clone())
            .ok_or_else(|| SessionError::Rejected("empty column reference".into())),
        other => Err(SessionError::Rejected(format!(
            "expected a column, got {}",
            other
        ))),
    }
}

fn table_factor_name(factor: &sql_ast::TableFactor) -> SessionResult<String> {
    match factor {
        sql_ast::TableFactor::Table { name, .. } => object_name(name),
        _ => Err(SessionError::Rejected("complex table references are not supported".into())),
    }
}

fn object_name(name: &sql_ast::ObjectName) -> SessionResult<String> {
    name.0
        .last()
        .map(|part| trim_sql_identifier(&part.to_string()))
        .ok_or_else(|| SessionError::Rejected("invalid object name".into()))
}

fn parse_create_table(ddl: &str) -> SessionResult<MemPlan> {
    let open_idx = ddl
        .find('(')
        .ok_or_else(|| SessionError::Rejected("CREATE TABLE needs a column list".into()))?;
    let close_idx = ddl
        .rfind(')')
        .filter(|&idx| idx > open_idx)
        .ok_or_else(|| SessionError::Rejected("CREATE TABLE has unbalanced parentheses".into()))?;

    let head = &ddl[..open_idx];
    let if_not_exists = head.to_ascii_uppercase().contains("IF NOT EXISTS");
    let table = head
        .split_whitespace()
        .last()
        .map(trim_sql_identifier)
        .filter(|name| !name.is_empty() && !name.eq_ignore_ascii_case("TABLE"))
        .ok_or_else(|| SessionError::Rejected("CREATE TABLE needs a table name".into()))?;

    let mut columns: Vec<MemColumn> = Vec::new();
    let mut key_columns: Vec<String> = Vec::new();

    for segment in split_top_level_commas(&ddl[open_idx + 1..close_idx]) {
        let upper = segment.to_ascii_uppercase();
        if upper.starts_with("PRIMARY KEY") {
            let list = segment
                .split_once('(')
                .and_then(|(_, rest)| rest.rsplit_once(')'))
                .map(|(inner, _)| inner)
                .ok_or_else(|| SessionError::Rejected("PRIMARY KEY needs a column list".into()))?;
            key_columns.extend(split_top_level_commas(list).iter().map(|c| trim_sql_identifier(c)));
            continue;
        }
        if upper.starts_with("CONSTRAINT") || upper.starts_with("UNIQUE") || upper.starts_with("CHECK") {
            return Err(SessionError::Rejected(format!("unsupported table constraint: {}", segment)));
        }

        let mut parts = segment.split_whitespace();
        let Some(raw_name) = parts.next() else {
            continue;
        };
        let name = trim_sql_identifier(raw_name);
        let Some(type_name) = parts.next() else {
            return Err(SessionError::Rejected(format!("column '{}' has no SQL type", name)));
        };

        columns.push(MemColumn {
            kind: ColumnKind::parse(type_name)?,
            nullable: !upper.contains("NOT NULL") && !upper.contains("PRIMARY KEY"),
            primary_key: upper.contains("PRIMARY KEY"),
            name,
        });
    }

    for key in &key_columns {
        let column = columns
            .iter_mut()
            .find(|c| c.name.eq_ignore_ascii_case(key))
            .ok_or_else(|| SessionError::Rejected(format!("primary key column '{}' is not declared", key)))?;
        column.primary_key = true;
        column.nullable = false;
    }

    Ok(MemPlan::CreateTable {
        table,
        columns,
        if_not_exists,
    })
}

fn split_top_level_commas(input: &str) -> Vec<String> {
    let mut result = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;

    for ch in input.chars() {
        match ch {
            '(' => {
                depth += 1;
                current.push(ch);
            }
            ')' => {
                depth = depth.saturating_sub(1);
                current.push(ch);
            }
            ',' if depth == 0 => {
                result.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(ch),
        }
    }

    if !current.trim().is_empty() {
        result.push(current.trim().to_string());
    }

    result
}

fn trim_sql_identifier(value: &str) -> String {
    value.trim().trim_matches('"').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_create_table() {
        let plan = MemPlan::parse(
            "CREATE TABLE \"orders\" (\"id\" BIGINT NOT NULL, \"amount\" DECIMAL(18,2) NOT NULL, \
             \"note\" TEXT, PRIMARY KEY (\"id\"))",
        )
        .unwrap();
        let MemPlan::CreateTable { table, columns, if_not_exists } = plan else {
            panic!("expected CREATE TABLE");
        };
        assert_eq!(table, "orders");
        assert!(!if_not_exists);
        assert_eq!(columns.len(), 3);
        assert!(columns[0].primary_key);
        assert_eq!(columns[1].kind, ColumnKind::Decimal { scale: 2 });
        assert!(columns[2].nullable);
    }

    #[test]
    fn test_parse_update_with_params() {
        let plan = MemPlan::parse("UPDATE \"orders\" SET \"note\" = $1 WHERE \"id\" IN ($2, $3)").unwrap();
        let MemPlan::Update { table, assignments, filter } = plan else {
            panic!("expected UPDATE");
        };
        assert_eq!(table, "orders");
        assert_eq!(assignments, vec![("note".to_string(), Operand::Param(0))]);
        assert_eq!(
            filter,
            Some(Filter::In {
                column: "id".into(),
                operands: vec![Operand::Param(1), Operand::Param(2)],
            })
        );
    }

    #[test]
    fn test_parse_select_shapes() {
        let plan = MemPlan::parse("SELECT COUNT(*) FROM \"orders\" WHERE \"id\" = $1").unwrap();
        assert!(matches!(plan, MemPlan::Select { projection: Projection::CountStar, .. }));

        let plan = MemPlan::parse("SELECT 1 FROM \"orders\" LIMIT 1").unwrap();
        assert!(matches!(
            plan,
            MemPlan::Select {
                projection: Projection::Constant(WireValue::Int64(1)),
                limit: Some(1),
                ..
            }
        ));

        let plan = MemPlan::parse("SELECT \"id\", \"note\" FROM \"orders\"").unwrap();
        assert!(matches!(plan, MemPlan::Select { projection: Projection::Columns(ref c), .. } if c.len() == 2));
    }

    #[test]
    fn test_parse_drop_and_delete() {
        assert_eq!(
            MemPlan::parse("DROP TABLE IF EXISTS \"orders\"").unwrap(),
            MemPlan::DropTable {
                table: "orders".into(),
                if_exists: true,
            }
        );
        let plan = MemPlan::parse("DELETE FROM \"orders\" WHERE \"id\" = $1 AND \"note\" = 'x'").unwrap();
        assert!(matches!(plan, MemPlan::Delete { filter: Some(Filter::And(..)), .. }));
        assert_eq!(MemPlan::parse("BEGIN").unwrap(), MemPlan::Begin);
    }

    #[test]
    fn test_rejects_unsupported() {
        assert!(MemPlan::parse("SELECT * FROM a JOIN b ON a.x = b.x").is_err());
        assert!(MemPlan::parse("DELETE FROM \"orders\" WHERE \"id\" > 3").is_err());
    }
}
