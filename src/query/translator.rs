use super::{Assignments, Predicate, StatementLimits};
use crate::core::{DbError, Result, TableSchema, Value, WireValue};
use crate::mapping::encode;
use std::collections::HashSet;

/// A rendered statement fragment with its positional parameters.
///
/// Placeholders are numbered `$n` starting at the offset the fragment was
/// rendered with, so fragments compose left to right.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub sql: String,
    pub params: Vec<WireValue>,
}

impl Fragment {
    /// Number of the placeholder following this fragment.
    pub fn next_param(&self, first_param: usize) -> usize {
        first_param + self.params.len()
    }
}

/// Double-quotes an identifier.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Renders predicates and assignment sets over one table schema.
///
/// Output is deterministic: the same input always yields the same text and
/// parameter order.
pub struct Translator<'a> {
    schema: &'a TableSchema,
}

impl<'a> Translator<'a> {
    pub fn new(schema: &'a TableSchema) -> Self {
        Self { schema }
    }

    pub fn translate_predicate(&self, predicate: &Predicate, first_param: usize) -> Result<Fragment> {
        let mut params = Vec::new();
        let sql = self.render(predicate, first_param, &mut params)?;
        Ok(Fragment { sql, params })
    }

    /// Renders `"col" = $n, ...` for an UPDATE's SET clause.
    pub fn translate_assignments(&self, assignments: &Assignments, first_param: usize) -> Result<Fragment> {
        if assignments.is_empty() {
            return Err(DbError::InvalidAssignment(format!(
                "no columns to update in table '{}'",
                self.schema.table()
            )));
        }

        let mut seen = HashSet::new();
        let mut parts = Vec::with_capacity(assignments.len());
        let mut params = Vec::with_capacity(assignments.len());

        for (name, value) in assignments.iter() {
            let column = self.schema.require_column(name)?;
            if column.primary_key {
                return Err(DbError::InvalidAssignment(format!(
                    "primary key column '{}' cannot be updated",
                    column.column
                )));
            }
            if !seen.insert(column.column.as_str()) {
                return Err(DbError::InvalidAssignment(format!(
                    "column '{}' is assigned more than once",
                    column.column
                )));
            }

            params.push(encode(value, column)?);
            parts.push(format!(
                "{} = ${}",
                quote_identifier(&column.column),
                first_param + params.len() - 1
            ));
        }

        Ok(Fragment {
            sql: parts.join(", "),
            params,
        })
    }

    /// Checks every column, operand and value type of `predicate` without
    /// rendering it. An empty `IN` list passes here.
    pub fn validate(&self, predicate: &Predicate) -> Result<()> {
        match predicate {
            Predicate::Eq { column, value } => {
                let descriptor = self.schema.require_column(column)?;
                if value.is_null() {
                    return Err(DbError::UnsupportedExpression(format!(
                        "equality against NULL on column '{}'",
                        descriptor.column
                    )));
                }
                encode(value, descriptor)?;
            }
            Predicate::In { column, values } => {
                let descriptor = self.schema.require_column(column)?;
                for value in values {
                    if value.is_null() {
                        return Err(DbError::UnsupportedExpression(format!(
                            "NULL inside IN list on column '{}'",
                            descriptor.column
                        )));
                    }
                    encode(value, descriptor)?;
                }
            }
            Predicate::And(inner) => {
                if inner.is_empty() {
                    return Err(DbError::UnsupportedExpression(
                        "empty conjunction".to_string(),
                    ));
                }
                for p in inner {
                    self.validate(p)?;
                }
            }
        }
        Ok(())
    }

    /// Splits a predicate so that each resulting statement fits `limits`.
    ///
    /// `overhead_bytes` and `overhead_params` describe the rest of the
    /// statement the predicate is embedded into. Set-membership values are
    /// de-duplicated first; when the statement still does not fit, the
    /// largest top-level `IN` list is cut into chunks, halving the chunk
    /// size until every chunk fits. A predicate that matches nothing yields
    /// no chunks.
    pub fn plan_chunks(
        &self,
        predicate: &Predicate,
        limits: &StatementLimits,
        overhead_bytes: usize,
        overhead_params: usize,
    ) -> Result<Vec<Predicate>> {
        self.validate(predicate)?;
        if predicate.is_provably_empty() {
            return Ok(Vec::new());
        }

        let predicate = self.dedup(predicate)?;
        if self.fits(&predicate, limits, overhead_bytes, overhead_params)? {
            return Ok(vec![predicate]);
        }

        let mut conjuncts: Vec<Predicate> = predicate.conjuncts().into_iter().cloned().collect();
        let split_at = conjuncts
            .iter()
            .enumerate()
            .filter_map(|(idx, p)| match p {
                Predicate::In { values, .. } if values.len() > 1 => Some((idx, values.len())),
                _ => None,
            })
            .max_by_key(|&(idx, len)| (len, std::cmp::Reverse(idx)))
            .map(|(idx, _)| idx);

        let Some(split_at) = split_at else {
            return Err(self.too_large(&predicate, overhead_bytes, overhead_params, limits));
        };

        let Predicate::In { column, values } = conjuncts.remove(split_at) else {
            return Err(self.too_large(&predicate, overhead_bytes, overhead_params, limits));
        };

        let fixed_params = overhead_params
            + conjuncts
                .iter()
                .map(|p| self.translate_predicate(p, 1).map(|f| f.params.len()))
                .sum::<Result<usize>>()?;
        let mut chunk_size = limits
            .max_in_list
            .min(limits.max_parameters.saturating_sub(fixed_params))
            .min(values.len());

        while chunk_size > 0 {
            let chunks: Vec<Predicate> = values
                .chunks(chunk_size)
                .map(|chunk| {
                    let mut parts = conjuncts.clone();
                    parts.insert(
                        split_at,
                        Predicate::In {
                            column: column.clone(),
                            values: chunk.to_vec(),
                        },
                    );
                    if parts.len() == 1 {
                        parts.remove(0)
                    } else {
                        Predicate::And(parts)
                    }
                })
                .collect();

            let mut all_fit = true;
            for chunk in &chunks {
                if !self.fits(chunk, limits, overhead_bytes, overhead_params)? {
                    all_fit = false;
                    break;
                }
            }
            if all_fit {
                return Ok(chunks);
            }
            chunk_size /= 2;
        }

        Err(self.too_large(&predicate, overhead_bytes, overhead_params, limits))
    }

    fn render(&self, predicate: &Predicate, first_param: usize, params: &mut Vec<WireValue>) -> Result<String> {
        match predicate {
            Predicate::Eq { column, value } => {
                let descriptor = self.schema.require_column(column)?;
                if value.is_null() {
                    return Err(DbError::UnsupportedExpression(format!(
                        "equality against NULL on column '{}'",
                        descriptor.column
                    )));
                }
                params.push(encode(value, descriptor)?);
                Ok(format!(
                    "{} = ${}",
                    quote_identifier(&descriptor.column),
                    first_param + params.len() - 1
                ))
            }
            Predicate::In { column, values } => {
                let descriptor = self.schema.require_column(column)?;
                if values.is_empty() {
                    return Err(DbError::UnsupportedExpression(format!(
                        "IN over an empty list on column '{}'",
                        descriptor.column
                    )));
                }

                let mut seen = HashSet::with_capacity(values.len());
                let mut placeholders = Vec::with_capacity(values.len());
                for value in values {
                    if value.is_null() {
                        return Err(DbError::UnsupportedExpression(format!(
                            "NULL inside IN list on column '{}'",
                            descriptor.column
                        )));
                    }
                    let wire = encode(value, descriptor)?;
                    if seen.insert(wire.clone()) {
                        params.push(wire);
                        placeholders.push(format!("${}", first_param + params.len() - 1));
                    }
                }

                Ok(format!(
                    "{} IN ({})",
                    quote_identifier(&descriptor.column),
                    placeholders.join(", ")
                ))
            }
            Predicate::And(inner) => {
                if inner.is_empty() {
                    return Err(DbError::UnsupportedExpression(
                        "empty conjunction".to_string(),
                    ));
                }
                let parts = inner
                    .iter()
                    .map(|p| self.render(p, first_param, params))
                    .collect::<Result<Vec<_>>>()?;
                Ok(parts.join(" AND "))
            }
        }
    }

    // Drops repeated IN members (compared by their encoded form).
    fn dedup(&self, predicate: &Predicate) -> Result<Predicate> {
        Ok(match predicate {
            Predicate::In { column, values } => {
                let descriptor = self.schema.require_column(column)?;
                let mut seen = HashSet::with_capacity(values.len());
                let mut unique = Vec::with_capacity(values.len());
                for value in values {
                    if value.is_null() {
                        unique.push(Value::Null);
                        continue;
                    }
                    if seen.insert(encode(value, descriptor)?) {
                        unique.push(value.clone());
                    }
                }
                Predicate::In {
                    column: column.clone(),
                    values: unique,
                }
            }
            Predicate::And(inner) => Predicate::And(
                inner
                    .iter()
                    .map(|p| self.dedup(p))
                    .collect::<Result<Vec<_>>>()?,
            ),
            other => other.clone(),
        })
    }

    fn fits(
        &self,
        predicate: &Predicate,
        limits: &StatementLimits,
        overhead_bytes: usize,
        overhead_params: usize,
    ) -> Result<bool> {
        if longest_in_list(predicate) > limits.max_in_list {
            return Ok(false);
        }
        let fragment = self.translate_predicate(predicate, overhead_params + 1)?;
        Ok(limits.fits(
            overhead_bytes + fragment.sql.len(),
            overhead_params + fragment.params.len(),
        ))
    }

    fn too_large(
        &self,
        predicate: &Predicate,
        overhead_bytes: usize,
        overhead_params: usize,
        limits: &StatementLimits,
    ) -> DbError {
        let (bytes, params) = match self.translate_predicate(predicate, overhead_params + 1) {
            Ok(fragment) => (overhead_bytes + fragment.sql.len(), overhead_params + fragment.params.len()),
            Err(err) => return err,
        };
        DbError::StatementTooLarge(format!(
            "predicate on '{}' needs {} bytes and {} parameters and cannot be split to fit \
             {} bytes, {} parameters, {} IN members",
            self.schema.table(),
            bytes,
            params,
            limits.max_statement_bytes,
            limits.max_parameters,
            limits.max_in_list
        ))
    }
}

fn longest_in_list(predicate: &Predicate) -> usize {
    match predicate {
        Predicate::Eq { .. } => 0,
        Predicate::In { values, .. } => values.len(),
        Predicate::And(inner) => inner.iter().map(longest_in_list).max().unwrap_or(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ColumnDescriptor, SqlType};
    use crate::query::col;

    fn schema() -> TableSchema {
        TableSchema::new(
            "orders",
            vec![
                ColumnDescriptor::new("order_id", SqlType::Int64).primary_key().field("id"),
                ColumnDescriptor::new("status", SqlType::Text),
                ColumnDescriptor::new("qty", SqlType::Int32).nullable(),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_equality_and_membership() {
        let schema = schema();
        let t = Translator::new(&schema);
        let p = col("status").eq("open").and(col("id").is_in([3i64, 1, 3, 2]));
        let f = t.translate_predicate(&p, 1).unwrap();
        assert_eq!(f.sql, "\"status\" = $1 AND \"order_id\" IN ($2, $3, $4)");
        assert_eq!(
            f.params,
            vec![
                WireValue::Utf8("open".into()),
                WireValue::Int64(3),
                WireValue::Int64(1),
                WireValue::Int64(2),
            ]
        );
        assert_eq!(f.next_param(1), 5);
    }

    #[test]
    fn test_translation_is_deterministic() {
        let schema = schema();
        let t = Translator::new(&schema);
        let p = col("id").is_in([5i64, 4, 3]).and(col("qty").eq(7));
        assert_eq!(t.translate_predicate(&p, 3).unwrap(), t.translate_predicate(&p, 3).unwrap());
    }

    #[test]
    fn test_unsupported_shapes() {
        let schema = schema();
        let t = Translator::new(&schema);
        let err = t.translate_predicate(&col("qty").eq(Value::Null), 1).unwrap_err();
        assert!(matches!(err, DbError::UnsupportedExpression(_)));

        let err = t.translate_predicate(&Predicate::And(vec![]), 1).unwrap_err();
        assert!(matches!(err, DbError::UnsupportedExpression(_)));

        let empty: Vec<i64> = vec![];
        let err = t.translate_predicate(&col("id").is_in(empty), 1).unwrap_err();
        assert!(matches!(err, DbError::UnsupportedExpression(_)));

        let err = t.translate_predicate(&col("missing").eq(1), 1).unwrap_err();
        assert!(matches!(err, DbError::ColumnNotFound(..)));
    }

    #[test]
    fn test_assignments() {
        let schema = schema();
        let t = Translator::new(&schema);
        let set = Assignments::new().set("status", "shipped").set("qty", Value::Null);
        let f = t.translate_assignments(&set, 1).unwrap();
        assert_eq!(f.sql, "\"status\" = $1, \"qty\" = $2");
        assert_eq!(f.params[1], WireValue::Null);

        let dup = Assignments::new().set("status", "a").set("status", "b");
        assert!(matches!(t.translate_assignments(&dup, 1), Err(DbError::InvalidAssignment(_))));

        let pk = Assignments::new().set("id", 5i64);
        assert!(matches!(t.translate_assignments(&pk, 1), Err(DbError::InvalidAssignment(_))));

        assert!(matches!(
            t.translate_assignments(&Assignments::new(), 1),
            Err(DbError::InvalidAssignment(_))
        ));
    }

    #[test]
    fn test_plan_chunks_splits_largest_list() {
        let schema = schema();
        let t = Translator::new(&schema);
        let limits = StatementLimits::default().max_in_list(100).max_parameters(150);
        let p = col("status").eq("open").and(col("id").is_in(0i64..250));

        let chunks = t.plan_chunks(&p, &limits, 40, 0).unwrap();
        assert_eq!(chunks.len(), 3);

        let mut members = 0;
        for chunk in &chunks {
            let f = t.translate_predicate(chunk, 1).unwrap();
            assert!(f.params.len() <= 150);
            assert!(f.sql.starts_with("\"status\" = $1 AND "));
            members += f.params.len() - 1;
        }
        assert_eq!(members, 250);
    }

    #[test]
    fn test_plan_chunks_fitting_predicate_is_unchanged() {
        let schema = schema();
        let t = Translator::new(&schema);
        let p = col("id").is_in([1i64, 2, 2]);
        let chunks = t.plan_chunks(&p, &StatementLimits::default(), 0, 0).unwrap();
        assert_eq!(chunks, vec![col("id").is_in([1i64, 2])]);
    }

    #[test]
    fn test_plan_chunks_statement_too_large() {
        let schema = schema();
        let t = Translator::new(&schema);
        let limits = StatementLimits::default().max_statement_bytes(16);
        let p = col("status").eq("open").and(col("qty").eq(3));
        let err = t.plan_chunks(&p, &limits, 0, 0).unwrap_err();
        assert!(matches!(err, DbError::StatementTooLarge(_)));
    }

    #[test]
    fn test_plan_chunks_empty_list_yields_nothing() {
        let schema = schema();
        let t = Translator::new(&schema);
        let empty: Vec<i64> = vec![];
        let chunks = t
            .plan_chunks(&col("id").is_in(empty), &StatementLimits::default(), 0, 0)
            .unwrap();
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_empty_list_still_checks_other_conjuncts() {
        let schema = schema();
        let t = Translator::new(&schema);
        let limits = StatementLimits::default();
        let empty = || Vec::<i64>::new();

        let err = t.plan_chunks(&col("missing").is_in(empty()), &limits, 0, 0).unwrap_err();
        assert!(matches!(err, DbError::ColumnNotFound(..)));

        let p = col("id").is_in(empty()).and(col("status").eq(Value::Null));
        let err = t.plan_chunks(&p, &limits, 0, 0).unwrap_err();
        assert!(matches!(err, DbError::UnsupportedExpression(_)));

        let p = col("id").is_in(empty()).and(col("qty").eq("seven"));
        let err = t.plan_chunks(&p, &limits, 0, 0).unwrap_err();
        assert!(matches!(err, DbError::TypeMismatch(_)));
    }
}
