use std::path::Path;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Row, Sqlite};

use crate::alert::CanonicalAlert;

pub type Db = Pool<Sqlite>;

// --- Database Initialization ---

pub async fn init_db(db_file: &str) -> Result<Db, sqlx::Error> {
    if let Some(parent) = Path::new(db_file).parent() {
        if !parent.as_os_str().is_empty() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                println!("[DATABASE] Could not create {}: {}", parent.display(), e);
            }
        }
    }

    let options = SqliteConnectOptions::new()
        .filename(db_file)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS alerts (
            id TEXT PRIMARY KEY,
            timestamp TEXT NOT NULL,
            level TEXT NOT NULL,
            category TEXT NOT NULL,
            data TEXT NOT NULL
        )",
    )
    .execute(&pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_alerts_timestamp ON alerts (timestamp)")
        .execute(&pool)
        .await?;

    println!("[DATABASE] Alert store ready ({})", db_file);
    Ok(pool)
}

// --- Core Operations ---

pub async fn insert_alert(pool: &Db, alert: &CanonicalAlert, data: &str) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT INTO alerts (id, timestamp, level, category, data) VALUES (?1, ?2, ?3, ?4, ?5)")
        .bind(&alert.id)
        .bind(&alert.timestamp)
        .bind(&alert.level)
        .bind(&alert.category)
        .bind(data)
        .execute(pool)
        .await?;
    Ok(())
}

/// The `limit` newest alerts, returned oldest-first so callers can replay
/// them chronologically. Rows whose payload no longer decodes are skipped.
pub async fn recent_alerts(pool: &Db, limit: i64) -> Result<Vec<CanonicalAlert>, sqlx::Error> {
    let rows = sqlx::query("SELECT data FROM alerts ORDER BY timestamp DESC LIMIT ?1")
        .bind(limit)
        .fetch_all(pool)
        .await?;

    let mut alerts = Vec::with_capacity(rows.len());
    for row in rows {
        let data: String = row.get("data");
        match serde_json::from_str::<CanonicalAlert>(&data) {
            Ok(alert) => alerts.push(alert),
            Err(e) => println!("[DATABASE] Skipping undecodable alert row: {}", e),
        }
    }
    alerts.reverse();
    Ok(alerts)
}

/// Deletes everything outside the `keep` newest rows. Idempotent.
pub async fn prune_alerts(pool: &Db, keep: i64) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "DELETE FROM alerts WHERE id NOT IN
            (SELECT id FROM alerts ORDER BY timestamp DESC LIMIT ?1)",
    )
    .bind(keep)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
pub async fn count_alerts(pool: &Db) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM alerts")
        .fetch_one(pool)
        .await
}
