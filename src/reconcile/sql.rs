//! Statement builders for reconciliation passes.

use crate::error::{Error, Result};

/// Column discovery, ordinal order, scoped to the connection's database
pub const COLUMNS_QUERY: &str = "SELECT COLUMN_NAME FROM information_schema.columns \
     WHERE table_schema = DATABASE() AND table_name = ? ORDER BY ordinal_position";

/// Backtick-quote an identifier
pub fn quote_ident(name: &str) -> Result<String> {
    if name.is_empty() || name.contains('`') || name.contains('\0') {
        return Err(Error::Schema(format!("invalid identifier: {:?}", name)));
    }
    Ok(format!("`{}`", name))
}

/// Prepared statements for one table with a known column list
#[derive(Debug, Clone)]
pub struct TableStatements {
    /// Full snapshot ordered by the first column
    pub select_all: String,
    /// Truncate via DELETE so it stays inside the transaction
    pub delete_all: String,
    /// Insert-or-update keyed on the first column
    pub upsert: String,
}

impl TableStatements {
    pub fn new(table: &str, columns: &[String]) -> Result<Self> {
        let table = quote_ident(table)?;
        let quoted: Vec<String> = columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Result<_>>()?;
        let key = quoted
            .first()
            .ok_or_else(|| Error::Schema(format!("table {} has no columns", table)))?;

        let column_list = quoted.join(", ");
        let placeholders = vec!["?"; quoted.len()].join(", ");

        // A single-column table has nothing to update on conflict
        let updates = if quoted.len() > 1 {
            quoted[1..]
                .iter()
                .map(|c| format!("{c} = VALUES({c})"))
                .collect::<Vec<_>>()
                .join(", ")
        } else {
            format!("{key} = {key}")
        };

        Ok(Self {
            select_all: format!("SELECT {} FROM {} ORDER BY {}", column_list, table, key),
            delete_all: format!("DELETE FROM {}", table),
            upsert: format!(
                "INSERT INTO {} ({}) VALUES ({}) ON DUPLICATE KEY UPDATE {}",
                table, column_list, placeholders, updates
            ),
        })
    }
}
