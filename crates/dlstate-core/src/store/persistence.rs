//! SQLite-based persistence layer for download records

use super::DownloadStore;
use crate::error::DlstateError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dlstate_types::{Download, DownloadError, DownloadStatus, RequestOptions};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePool, SqliteRow},
    Row,
};
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

/// Database connection pool for download records
#[derive(Clone, Debug)]
pub struct DownloadDatabase {
    pool: SqlitePool,
}

impl DownloadDatabase {
    /// Open (or create) the database at `db_path`
    pub async fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, DlstateError> {
        let path = db_path.as_ref();

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        let pool = SqlitePool::connect_with(options).await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS downloads (
                id TEXT PRIMARY KEY,
                url TEXT NOT NULL,
                file TEXT NOT NULL,
                status TEXT NOT NULL,
                error TEXT NOT NULL DEFAULT 'none',
                downloaded INTEGER NOT NULL DEFAULT 0,
                total INTEGER,
                options TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_downloads_status ON downloads(status);
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    /// Close the pool, waiting for in-flight queries
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl DownloadStore for DownloadDatabase {
    async fn update(&self, download: &Download) -> Result<(), DlstateError> {
        let options = serde_json::to_string(&download.options)?;

        sqlx::query(
            r#"
            INSERT INTO downloads (
                id, url, file, status, error, downloaded, total,
                options, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                url = excluded.url,
                file = excluded.file,
                status = excluded.status,
                error = excluded.error,
                downloaded = excluded.downloaded,
                total = excluded.total,
                options = excluded.options,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(download.id.to_string())
        .bind(&download.url)
        .bind(download.file.to_string_lossy().to_string())
        .bind(download.status().as_str())
        .bind(download.error().as_str())
        .bind(download.downloaded as i64)
        .bind(download.total.map(|t| t as i64))
        .bind(options)
        .bind(download.created_at.to_rfc3339())
        .bind(download.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        debug!("Stored download {} as {}", download.id, download.status());
        Ok(())
    }

    async fn update_file_bytes_and_status_only(
        &self,
        download: &Download,
    ) -> Result<(), DlstateError> {
        sqlx::query(
            r#"
            UPDATE downloads
            SET downloaded = ?, total = ?, status = ?, error = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(download.downloaded as i64)
        .bind(download.total.map(|t| t as i64))
        .bind(download.status().as_str())
        .bind(download.error().as_str())
        .bind(download.updated_at.to_rfc3339())
        .bind(download.id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_download(&self, download: &Download) -> Result<(), DlstateError> {
        sqlx::query("DELETE FROM downloads WHERE id = ?")
            .bind(download.id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn load_download(&self, id: Uuid) -> Result<Option<Download>, DlstateError> {
        let row = sqlx::query("SELECT * FROM downloads WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(row_to_download).transpose()
    }

    async fn load_all_downloads(&self) -> Result<Vec<Download>, DlstateError> {
        let rows = sqlx::query("SELECT * FROM downloads ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(row_to_download).collect()
    }
}

/// Convert a database row to a Download
fn row_to_download(row: SqliteRow) -> Result<Download, DlstateError> {
    let status_str: String = row.get("status");
    let status = DownloadStatus::parse(&status_str)
        .ok_or_else(|| DlstateError::InvalidRecord(format!("unknown status '{}'", status_str)))?;

    let options: RequestOptions = serde_json::from_str(row.get::<String, _>("options").as_str())?;

    Ok(Download::restore(
        Uuid::parse_str(row.get::<String, _>("id").as_str())
            .map_err(|e| DlstateError::InvalidRecord(e.to_string()))?,
        row.get("url"),
        PathBuf::from(row.get::<String, _>("file")),
        status,
        DownloadError::parse(row.get::<String, _>("error").as_str()),
        row.get::<i64, _>("downloaded") as u64,
        row.get::<Option<i64>, _>("total").map(|t| t as u64),
        options,
        parse_timestamp(row.get::<String, _>("created_at").as_str())?,
        parse_timestamp(row.get::<String, _>("updated_at").as_str())?,
    ))
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, DlstateError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DlstateError::InvalidRecord(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dlstate_types::RequestOption;
    use tempfile::TempDir;

    async fn open() -> (TempDir, DownloadDatabase) {
        let dir = tempfile::tempdir().unwrap();
        let db = DownloadDatabase::new(dir.path().join("db").join("downloads.db"))
            .await
            .unwrap();
        (dir, db)
    }

    #[tokio::test]
    async fn test_upsert_and_load() {
        let (_dir, db) = open().await;
        let mut download = Download::new("http://example.com/a.iso", "/data/a.iso")
            .with_options(RequestOptions::from([RequestOption::RemoveOnFailed]));
        download.total = Some(4096);
        db.update(&download).await.unwrap();

        download.mark_downloading();
        download.downloaded = 1024;
        db.update(&download).await.unwrap();

        let loaded = db.load_download(download.id).await.unwrap().unwrap();
        assert_eq!(loaded.status(), DownloadStatus::Downloading);
        assert_eq!(loaded.downloaded, 1024);
        assert_eq!(loaded.total, Some(4096));
        assert!(loaded.options.contains(RequestOption::RemoveOnFailed));
        assert_eq!(db.load_all_downloads().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_error_is_stored() {
        let (_dir, db) = open().await;
        let mut download = Download::new("http://example.com/a.iso", "/data/a.iso");
        download.fail_with(DownloadError::HttpNotFound);
        db.update(&download).await.unwrap();

        let loaded = db.load_download(download.id).await.unwrap().unwrap();
        assert_eq!(loaded.status(), DownloadStatus::Failed);
        assert_eq!(loaded.error(), DownloadError::HttpNotFound);
    }

    #[tokio::test]
    async fn test_checkpoint_leaves_other_columns() {
        let (_dir, db) = open().await;
        let mut download = Download::new("http://example.com/a.iso", "/data/a.iso");
        db.update(&download).await.unwrap();

        download.url = "http://mirror.example.com/a.iso".to_string();
        download.downloaded = 512;
        download.mark_downloading();
        db.update_file_bytes_and_status_only(&download).await.unwrap();

        let loaded = db.load_download(download.id).await.unwrap().unwrap();
        assert_eq!(loaded.downloaded, 512);
        assert_eq!(loaded.status(), DownloadStatus::Downloading);
        assert_eq!(loaded.url, "http://example.com/a.iso");
    }

    #[tokio::test]
    async fn test_delete_missing_record_is_ok() {
        let (_dir, db) = open().await;
        let download = Download::new("http://example.com/a.iso", "/data/a.iso");
        db.update(&download).await.unwrap();

        db.delete_download(&download).await.unwrap();
        db.delete_download(&download).await.unwrap();
        assert!(db.load_download(download.id).await.unwrap().is_none());
    }
}
