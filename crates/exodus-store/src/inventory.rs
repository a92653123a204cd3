use chrono::Utc;
use rusqlite::params;

use crate::credentials::parse_timestamp;
use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::Inventory;

impl Database {
    /// Replace the stored inventory wholesale.
    pub fn save_inventory(&self, data: &[u8]) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn().execute(
            "INSERT INTO inventory (id, data, updated_at)
             VALUES (1, ?1, ?2)
             ON CONFLICT (id) DO UPDATE SET
                data = excluded.data,
                updated_at = excluded.updated_at",
            params![data, now],
        )?;
        Ok(())
    }

    pub fn get_inventory(&self) -> Result<Inventory> {
        self.conn()
            .query_row(
                "SELECT data, updated_at FROM inventory WHERE id = 1",
                [],
                |row| {
                    Ok(Inventory {
                        data: row.get(0)?,
                        updated_at: parse_timestamp(row, 1)?,
                    })
                },
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Remove the stored inventory. Not an error when absent.
    pub fn delete_inventory(&self) -> Result<()> {
        self.conn().execute("DELETE FROM inventory WHERE id = 1", [])?;
        Ok(())
    }
}
