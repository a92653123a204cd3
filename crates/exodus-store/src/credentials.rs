use chrono::{DateTime, Utc};
use rusqlite::params;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::Credentials;

impl Database {
    /// Insert or replace the singleton credentials row.
    ///
    /// `created_at` is preserved across updates; `updated_at` is bumped on
    /// every save. The caller-supplied timestamps are ignored.
    pub fn save_credentials(&self, creds: &Credentials) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn().execute(
            "INSERT INTO credentials (id, url, username, password, is_data_sharing_allowed, created_at, updated_at)
             VALUES (1, ?1, ?2, ?3, ?4, ?5, ?5)
             ON CONFLICT (id) DO UPDATE SET
                url = excluded.url,
                username = excluded.username,
                password = excluded.password,
                is_data_sharing_allowed = excluded.is_data_sharing_allowed,
                updated_at = excluded.updated_at",
            params![
                creds.url,
                creds.username,
                creds.password,
                creds.is_data_sharing_allowed,
                now,
            ],
        )?;
        Ok(())
    }

    pub fn get_credentials(&self) -> Result<Credentials> {
        self.conn()
            .query_row(
                "SELECT url, username, password, is_data_sharing_allowed, created_at, updated_at
                 FROM credentials WHERE id = 1",
                [],
                row_to_credentials,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Remove the credentials row. Not an error when absent.
    pub fn delete_credentials(&self) -> Result<()> {
        self.conn()
            .execute("DELETE FROM credentials WHERE id = 1", [])?;
        Ok(())
    }
}

fn row_to_credentials(row: &rusqlite::Row<'_>) -> rusqlite::Result<Credentials> {
    Ok(Credentials {
        url: row.get(0)?,
        username: row.get(1)?,
        password: row.get(2)?,
        is_data_sharing_allowed: row.get(3)?,
        created_at: parse_timestamp(row, 4)?,
        updated_at: parse_timestamp(row, 5)?,
    })
}

pub(crate) fn parse_timestamp(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Credentials {
        Credentials::new(
            "https://vcenter.example.com".to_string(),
            "admin".to_string(),
            "secret123".to_string(),
        )
    }

    #[test]
    fn save_then_get_round_trip() {
        let db = Database::open(None).unwrap();
        let creds = sample();
        db.save_credentials(&creds).unwrap();

        let loaded = db.get_credentials().unwrap();
        assert_eq!(loaded.url, creds.url);
        assert_eq!(loaded.username, creds.username);
        assert_eq!(loaded.password, creds.password);
        assert!(!loaded.is_data_sharing_allowed);
    }

    #[test]
    fn get_without_row_is_not_found() {
        let db = Database::open(None).unwrap();
        assert!(matches!(db.get_credentials(), Err(StoreError::NotFound)));
    }

    #[test]
    fn second_save_updates_in_place() {
        let db = Database::open(None).unwrap();
        db.save_credentials(&sample()).unwrap();
        let first = db.get_credentials().unwrap();

        let mut updated = sample();
        updated.url = "https://new-vcenter.example.com".to_string();
        updated.username = "newadmin".to_string();
        updated.is_data_sharing_allowed = true;
        std::thread::sleep(std::time::Duration::from_millis(5));
        db.save_credentials(&updated).unwrap();

        let second = db.get_credentials().unwrap();
        assert_eq!(second.url, "https://new-vcenter.example.com");
        assert_eq!(second.username, "newadmin");
        assert!(second.is_data_sharing_allowed);

        // created_at survives the upsert, updated_at moves forward.
        assert_eq!(second.created_at, first.created_at);
        assert!(second.updated_at > first.updated_at);
    }

    #[test]
    fn delete_then_get_is_not_found() {
        let db = Database::open(None).unwrap();
        db.save_credentials(&sample()).unwrap();
        db.delete_credentials().unwrap();
        assert!(matches!(db.get_credentials(), Err(StoreError::NotFound)));
    }

    #[test]
    fn delete_without_row_is_fine() {
        let db = Database::open(None).unwrap();
        db.delete_credentials().unwrap();
    }

    #[test]
    fn save_after_delete_starts_fresh() {
        let db = Database::open(None).unwrap();
        db.save_credentials(&sample()).unwrap();
        db.delete_credentials().unwrap();

        let mut other = sample();
        other.username = "anotheruser".to_string();
        db.save_credentials(&other).unwrap();
        assert_eq!(db.get_credentials().unwrap().username, "anotheruser");
    }
}
