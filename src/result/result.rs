use crate::core::WireValue;

/// Rows returned by a session, still in wire form.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<WireValue>>,
}

impl ResultSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new(columns: Vec<String>, rows: Vec<Vec<WireValue>>) -> Self {
        Self { columns, rows }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// First cell of the first row, for single-value queries such as
    /// `COUNT(*)`.
    pub fn scalar(&self) -> Option<&WireValue> {
        self.rows.first().and_then(|row| row.first())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar() {
        let rs = ResultSet::new(vec!["count".into()], vec![vec![WireValue::Int64(42)]]);
        assert_eq!(rs.scalar().and_then(WireValue::as_i64), Some(42));
        assert!(ResultSet::empty().scalar().is_none());
    }
}
