use crate::core::Value;

/// Filter over the columns of one table.
///
/// The algebra is closed: equality, set membership and conjunction. Column
/// names are resolved against the table schema at translation time.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Eq { column: String, value: Value },
    In { column: String, values: Vec<Value> },
    And(Vec<Predicate>),
}

impl Predicate {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Eq {
            column: column.into(),
            value: value.into(),
        }
    }

    pub fn is_in<I, V>(column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::In {
            column: column.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Conjunction of all given predicates, flattening nested `And`s.
    pub fn all(predicates: impl IntoIterator<Item = Predicate>) -> Self {
        let mut flat = Vec::new();
        for predicate in predicates {
            match predicate {
                Self::And(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        Self::And(flat)
    }

    pub fn and(self, other: Predicate) -> Self {
        Self::all([self, other])
    }

    /// `true` when a conjunct is a set-membership test over an empty list,
    /// so no row can match.
    pub fn is_provably_empty(&self) -> bool {
        match self {
            Self::Eq { .. } => false,
            Self::In { values, .. } => values.is_empty(),
            Self::And(inner) => inner.iter().any(Predicate::is_provably_empty),
        }
    }

    /// Top-level conjuncts, with nested conjunctions flattened.
    pub fn conjuncts(&self) -> Vec<&Predicate> {
        match self {
            Self::And(inner) => inner.iter().flat_map(Predicate::conjuncts).collect(),
            other => vec![other],
        }
    }
}

/// Entry point of the predicate builder: `col("id").eq(5)`.
pub fn col(name: impl Into<String>) -> ColumnRef {
    ColumnRef { name: name.into() }
}

#[derive(Debug, Clone)]
pub struct ColumnRef {
    name: String,
}

impl ColumnRef {
    pub fn eq(self, value: impl Into<Value>) -> Predicate {
        Predicate::eq(self.name, value)
    }

    pub fn is_in<I, V>(self, values: I) -> Predicate
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Predicate::is_in(self.name, values)
    }
}

/// Ordered column/value pairs of an UPDATE.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Assignments {
    entries: Vec<(String, Value)>,
}

impl Assignments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.entries.push((column.into(), value.into()));
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(col, val)| (col.as_str(), val))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
