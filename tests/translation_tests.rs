use std::collections::HashSet;
use std::sync::Arc;
use tabula::executor::StatementBuilder;
use tabula::query::Translator;
use tabula::{
    col, Assignments, ColumnDescriptor, DbError, Predicate, SqlType, StatementLimits, TableRef, TableSchema, Value,
    WireValue,
};

fn schema() -> TableSchema {
    TableSchema::new(
        "accounts",
        vec![
            ColumnDescriptor::new("account_id", SqlType::Int64).primary_key().field("id"),
            ColumnDescriptor::new("owner", SqlType::Text),
            ColumnDescriptor::new("balance", SqlType::decimal(10, 2)),
            ColumnDescriptor::new("frozen", SqlType::Boolean),
        ],
    )
    .unwrap()
}

#[test]
fn test_equality_uses_physical_name_and_placeholder() {
    let schema = schema();
    let fragment = Translator::new(&schema)
        .translate_predicate(&col("id").eq(42i64), 1)
        .unwrap();
    assert_eq!(fragment.sql, "\"account_id\" = $1");
    assert_eq!(fragment.params, vec![WireValue::Int64(42)]);
}

#[test]
fn test_conjunction_numbers_parameters_in_order() {
    let schema = schema();
    let predicate = col("owner").eq("ada").and(col("id").is_in([1i64, 2, 3])).and(col("frozen").eq(false));
    let fragment = Translator::new(&schema).translate_predicate(&predicate, 3).unwrap();

    assert_eq!(
        fragment.sql,
        "\"owner\" = $3 AND \"account_id\" IN ($4, $5, $6) AND \"frozen\" = $7"
    );
    assert_eq!(fragment.params.len(), 5);
    assert_eq!(fragment.next_param(3), 8);
}

#[test]
fn test_values_never_appear_in_statement_text() {
    let schema = schema();
    let hostile = "x'; DROP TABLE accounts; --";
    let fragment = Translator::new(&schema)
        .translate_predicate(&col("owner").eq(hostile), 1)
        .unwrap();
    assert!(!fragment.sql.contains("DROP"));
    assert_eq!(fragment.params, vec![WireValue::Utf8(hostile.to_string())]);
}

#[test]
fn test_translation_is_deterministic() {
    let schema = schema();
    let translator = Translator::new(&schema);
    let predicate = col("id").is_in([5i64, 3, 5, 1]).and(col("frozen").eq(true));
    let a = translator.translate_predicate(&predicate, 1).unwrap();
    let b = translator.translate_predicate(&predicate, 1).unwrap();
    assert_eq!(a, b);
    assert_eq!(a.sql, "\"account_id\" IN ($1, $2, $3) AND \"frozen\" = $4");
}

#[test]
fn test_unsupported_shapes_are_rejected() {
    let schema = schema();
    let translator = Translator::new(&schema);

    let err = translator.translate_predicate(&col("owner").eq(Value::Null), 1).unwrap_err();
    assert!(matches!(err, DbError::UnsupportedExpression(_)));

    let err = translator.translate_predicate(&Predicate::And(Vec::new()), 1).unwrap_err();
    assert!(matches!(err, DbError::UnsupportedExpression(_)));

    let err = translator.translate_predicate(&col("nickname").eq("x"), 1).unwrap_err();
    assert!(matches!(err, DbError::ColumnNotFound(..)));

    let err = translator.translate_predicate(&col("id").eq("seven"), 1).unwrap_err();
    assert!(matches!(err, DbError::TypeMismatch(_)));
}

#[test]
fn test_assignment_rules() {
    let schema = schema();
    let translator = Translator::new(&schema);

    let set = translator
        .translate_assignments(&Assignments::new().set("owner", "bob").set("frozen", true), 1)
        .unwrap();
    assert_eq!(set.sql, "\"owner\" = $1, \"frozen\" = $2");

    for assignments in [
        Assignments::new(),
        Assignments::new().set("id", 1i64),
        Assignments::new().set("owner", "a").set("owner", "b"),
    ] {
        let err = translator.translate_assignments(&assignments, 1).unwrap_err();
        assert!(matches!(err, DbError::InvalidAssignment(_)), "{err}");
    }
}

#[test]
fn test_large_membership_is_split_without_losing_members() {
    let table = TableRef::new(Arc::new(schema()));
    let limits = StatementLimits::default().max_in_list(100).max_parameters(100);
    let keys: Vec<i64> = (0..1050).collect();

    let statements = StatementBuilder::new(&table, limits)
        .update(&col("id").is_in(keys), &Assignments::new().set("frozen", true))
        .unwrap();

    let mut covered = HashSet::new();
    for statement in &statements {
        assert!(statement.params.len() <= 100);
        assert_eq!(statement.params[0], WireValue::Bool(true));
        for param in &statement.params[1..] {
            assert!(covered.insert(param.clone()), "{param} bound twice");
        }
    }
    assert_eq!(covered.len(), 1050);
}

#[test]
fn test_split_keeps_other_conjuncts_in_every_chunk() {
    let table = TableRef::new(Arc::new(schema()));
    let limits = StatementLimits::default().max_in_list(10);
    let statements = StatementBuilder::new(&table, limits)
        .delete(&col("frozen").eq(true).and(col("id").is_in(0i64..25)))
        .unwrap();

    assert_eq!(statements.len(), 3);
    for statement in &statements {
        assert!(statement.sql.starts_with("DELETE FROM \"accounts\" WHERE \"frozen\" = $1 AND \"account_id\" IN ("));
        assert_eq!(statement.params[0], WireValue::Bool(true));
    }
}

#[test]
fn test_unsplittable_statement_is_too_large() {
    let table = TableRef::new(Arc::new(schema()));
    let limits = StatementLimits::default().max_statement_bytes(40);
    let err = StatementBuilder::new(&table, limits)
        .delete(&col("owner").eq("ada"))
        .unwrap_err();
    assert!(matches!(err, DbError::StatementTooLarge(_)));
}

#[test]
fn test_empty_membership_plans_no_statement() {
    let schema = schema();
    let empty: Vec<i64> = Vec::new();
    let chunks = Translator::new(&schema)
        .plan_chunks(
            &col("owner").eq("ada").and(col("id").is_in(empty)),
            &StatementLimits::default(),
            0,
            0,
        )
        .unwrap();
    assert!(chunks.is_empty());
}
