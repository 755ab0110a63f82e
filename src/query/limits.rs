use crate::core::{DbError, Result};
use serde::{Deserialize, Serialize};

/// Size limits a single statement must respect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatementLimits {
    /// Maximum number of bound parameters.
    pub max_parameters: usize,
    /// Maximum length of the statement text in bytes.
    pub max_statement_bytes: usize,
    /// Maximum number of members in one `IN` list.
    pub max_in_list: usize,
}

impl Default for StatementLimits {
    fn default() -> Self {
        Self {
            max_parameters: 1000,
            max_statement_bytes: 64 * 1024,
            max_in_list: 1000,
        }
    }
}

impl StatementLimits {
    pub fn max_parameters(mut self, max: usize) -> Self {
        self.max_parameters = max;
        self
    }

    pub fn max_statement_bytes(mut self, max: usize) -> Self {
        self.max_statement_bytes = max;
        self
    }

    pub fn max_in_list(mut self, max: usize) -> Self {
        self.max_in_list = max;
        self
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.max_parameters == 0 {
            return Err("max_parameters must be > 0".to_string());
        }
        if self.max_statement_bytes == 0 {
            return Err("max_statement_bytes must be > 0".to_string());
        }
        if self.max_in_list == 0 {
            return Err("max_in_list must be > 0".to_string());
        }
        Ok(())
    }

    pub fn fits(&self, sql_bytes: usize, params: usize) -> bool {
        sql_bytes <= self.max_statement_bytes && params <= self.max_parameters
    }

    /// Fails with `StatementTooLarge` when a finished statement exceeds the
    /// limits.
    pub fn check(&self, sql: &str, params: usize) -> Result<()> {
        if self.fits(sql.len(), params) {
            return Ok(());
        }
        Err(DbError::StatementTooLarge(format!(
            "{} bytes and {} parameters (limits: {} bytes, {} parameters)",
            sql.len(),
            params,
            self.max_statement_bytes,
            self.max_parameters
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let limits = StatementLimits::default();
        assert!(limits.validate().is_ok());
        assert_eq!(limits.max_statement_bytes, 65536);
        assert!(StatementLimits::default().max_in_list(0).validate().is_err());
    }

    #[test]
    fn test_check() {
        let limits = StatementLimits::default().max_parameters(2).max_statement_bytes(20);
        assert!(limits.check("SELECT 1", 2).is_ok());
        assert!(matches!(
            limits.check("SELECT 1", 3),
            Err(DbError::StatementTooLarge(_))
        ));
        assert!(limits.check("SELECT * FROM a_very_long_table", 0).is_err());
    }
}
