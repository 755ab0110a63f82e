// ============================================================================
// Undo log of the in-memory backend
// ============================================================================
//
// Every mutation records the change needed to reverse it. A failed
// statement reverts its own changes; ROLLBACK reverts the whole
// transaction log in reverse order.
//
// ============================================================================

use super::table::{MemTable, WireRow};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub enum Change {
    /// A row was inserted under `key`
    InsertRow { table: String, key: WireRow },

    /// A row was written under `key`, replacing `previous` if any
    UpsertRow {
        table: String,
        key: WireRow,
        previous: Option<WireRow>,
    },

    /// The row under `key` was modified
    UpdateRow {
        table: String,
        key: WireRow,
        old_row: WireRow,
    },

    /// The row under `key` was removed
    DeleteRow {
        table: String,
        key: WireRow,
        old_row: WireRow,
    },

    CreateTable { table: String },

    DropTable { table: MemTable },
}

impl Change {
    pub fn table_name(&self) -> &str {
        match self {
            Change::InsertRow { table, .. }
            | Change::UpsertRow { table, .. }
            | Change::UpdateRow { table, .. }
            | Change::DeleteRow { table, .. }
            | Change::CreateTable { table } => table,
            Change::DropTable { table } => table.name(),
        }
    }

    pub fn is_ddl(&self) -> bool {
        matches!(self, Change::CreateTable { .. } | Change::DropTable { .. })
    }

    /// Reverses the change.
    pub fn undo(self, tables: &mut HashMap<String, MemTable>) {
        match self {
            Change::InsertRow { table, key } => {
                if let Some(t) = tables.get_mut(&table) {
                    t.remove(&key);
                }
            }
            Change::UpsertRow {
                table,
                key,
                previous,
            } => {
                if let Some(t) = tables.get_mut(&table) {
                    match previous {
                        Some(row) => {
                            t.put(key, row);
                        }
                        None => {
                            t.remove(&key);
                        }
                    }
                }
            }
            Change::UpdateRow {
                table,
                key,
                old_row,
            }
            | Change::DeleteRow {
                table,
                key,
                old_row,
            } => {
                if let Some(t) = tables.get_mut(&table) {
                    t.put(key, old_row);
                }
            }
            Change::CreateTable { table } => {
                tables.remove(&table);
            }
            Change::DropTable { table } => {
                tables.insert(table.name().to_string(), table);
            }
        }
    }
}

/// Reverts changes newest first.
pub fn undo_all(changes: Vec<Change>, tables: &mut HashMap<String, MemTable>) {
    for change in changes.into_iter().rev() {
        change.undo(tables);
    }
}
