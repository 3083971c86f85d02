use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use log::debug;
use serde_json::Map;
use serde_json::Value;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::sqlite::SqliteRow;
use sqlx::Column;
use sqlx::Connection;
use sqlx::Row;
use sqlx::SqliteConnection;
use sqlx::TypeInfo;
use sqlx::ValueRef;
use std::path::Path;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StateImplError {
    #[error(transparent)]
    SqliteError(#[from] sqlx::Error),
}

/// Read-only access to the per-mission `sgNNN.db` database. A connection is
/// opened per query and dropped right after, so nothing here ever holds a
/// lock the ingestion side could be waiting on.
#[derive(Clone, Default)]
pub struct SqliteStateImpl;

pub fn database_path(mission_dir: &Path, glider: u32) -> PathBuf {
    mission_dir.join(format!("sg{:03}.db", glider))
}

impl SqliteStateImpl {
    pub fn new() -> Self {
        Self
    }

    async fn open(&self, db: &Path) -> Result<Option<SqliteConnection>, StateImplError> {
        if !tokio::fs::try_exists(db).await.unwrap_or(false) {
            debug!("no database at {}", db.display());
            return Ok(None);
        }

        let options = SqliteConnectOptions::new().filename(db).read_only(true);
        let conn = SqliteConnection::connect_with(&options).await?;
        Ok(Some(conn))
    }
}

impl SqliteStateImpl {
    /// Most recent rows of the `calls` table, newest first.
    pub async fn latest_calls(&self, db: &Path, limit: u32) -> Result<Vec<Value>, StateImplError> {
        let Some(mut conn) = self.open(db).await? else {
            return Ok(vec![]);
        };

        let rows = sqlx::query("SELECT * FROM calls ORDER BY epoch DESC LIMIT ?")
            .bind(limit)
            .fetch_all(&mut conn)
            .await?;

        conn.close().await?;

        Ok(rows.iter().map(row_to_json).collect())
    }
}

impl SqliteStateImpl {
    /// Chat rows newer than `since`, oldest first, capped to the newest
    /// `limit` of them. Also returns the timestamp of the last row returned
    /// so the caller can continue from there.
    pub async fn chat_since(
        &self,
        db: &Path,
        since: f64,
        limit: u32,
    ) -> Result<(Vec<Value>, Option<f64>), StateImplError> {
        let Some(mut conn) = self.open(db).await? else {
            return Ok((vec![], None));
        };

        let rows = sqlx::query(
            "
            SELECT * FROM (
                SELECT * FROM chat
                WHERE timestamp > ?
                ORDER BY timestamp DESC
                LIMIT ?
            )
            ORDER BY timestamp ASC
            ",
        )
        .bind(since)
        .bind(limit)
        .fetch_all(&mut conn)
        .await?;

        conn.close().await?;

        let last = rows
            .last()
            .and_then(|row| row.try_get::<f64, _>("timestamp").ok());

        Ok((rows.iter().map(row_to_json).collect(), last))
    }
}

fn row_to_json(row: &SqliteRow) -> Value {
    let mut object = Map::new();

    for (i, column) in row.columns().iter().enumerate() {
        let value = match row.try_get_raw(i) {
            Ok(raw) if raw.is_null() => Value::Null,
            Ok(raw) => {
                let storage = raw.type_info().name().to_uppercase();
                match storage.as_str() {
                    "INTEGER" | "BOOLEAN" | "INT8" => row
                        .try_get_unchecked::<i64, _>(i)
                        .map(Value::from)
                        .unwrap_or(Value::Null),
                    "REAL" => row
                        .try_get_unchecked::<f64, _>(i)
                        .map(Value::from)
                        .unwrap_or(Value::Null),
                    "BLOB" => row
                        .try_get_unchecked::<Vec<u8>, _>(i)
                        .map(|bytes| Value::String(STANDARD.encode(bytes)))
                        .unwrap_or(Value::Null),
                    _ => row
                        .try_get_unchecked::<String, _>(i)
                        .map(Value::String)
                        .unwrap_or(Value::Null),
                }
            }
            Err(_) => Value::Null,
        };

        object.insert(column.name().to_string(), value);
    }

    Value::Object(object)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seed(path: &Path) {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let mut conn = SqliteConnection::connect_with(&options).await.unwrap();

        for statement in [
            "CREATE TABLE calls(dive INTEGER, cycle INTEGER, epoch REAL, lat REAL, lon REAL)",
            "INSERT INTO calls VALUES (1, 0, 100.0, 47.5, -122.3)",
            "INSERT INTO calls VALUES (2, 0, 200.0, 47.6, -122.4)",
            "INSERT INTO calls VALUES (3, 0, 300.0, 47.7, -122.5)",
            "CREATE TABLE chat(idx INTEGER PRIMARY KEY AUTOINCREMENT, timestamp REAL, user TEXT, message TEXT, attachment BLOB, mime TEXT)",
            "INSERT INTO chat(timestamp, user, message) VALUES (10.0, 'alice', 'one')",
            "INSERT INTO chat(timestamp, user, message) VALUES (20.0, 'bob', 'two')",
            "INSERT INTO chat(timestamp, user, message, attachment, mime) VALUES (30.0, 'alice', 'three', x'010203', 'image/png')",
        ] {
            sqlx::query(statement).execute(&mut conn).await.unwrap();
        }

        conn.close().await.unwrap();
    }

    #[tokio::test]
    async fn latest_calls_are_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let db = database_path(dir.path(), 237);
        seed(&db).await;

        let rows = SqliteStateImpl::new().latest_calls(&db, 2).await.unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["dive"], 3);
        assert_eq!(rows[1]["dive"], 2);
        assert_eq!(rows[0]["lat"], 47.7);
    }

    #[tokio::test]
    async fn chat_since_keeps_the_newest_rows_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let db = database_path(dir.path(), 237);
        seed(&db).await;

        let state = SqliteStateImpl::new();
        let (rows, last) = state.chat_since(&db, 0.0, 2).await.unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["message"], "two");
        assert_eq!(rows[1]["message"], "three");
        assert_eq!(rows[1]["attachment"], "AQID");
        assert_eq!(rows[0]["attachment"], Value::Null);
        assert_eq!(last, Some(30.0));

        let (rows, last) = state.chat_since(&db, 30.0, 10).await.unwrap();
        assert!(rows.is_empty());
        assert_eq!(last, None);
    }

    #[tokio::test]
    async fn missing_database_means_no_rows() {
        let dir = tempfile::tempdir().unwrap();
        let db = database_path(dir.path(), 12);

        let state = SqliteStateImpl::new();
        assert!(state.latest_calls(&db, 3).await.unwrap().is_empty());
        assert_eq!(state.chat_since(&db, 0.0, 3).await.unwrap(), (vec![], None));
    }
}
