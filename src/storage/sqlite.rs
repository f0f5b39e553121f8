//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Store trait.

use crate::crawler::Document;
use crate::embedding::ChunkEmbedding;
use crate::job::{CrawlOptions, JobOutcome, JobReport, JobStatus};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{StorageError, StorageResult, Store};
use crate::storage::{Frequency, JobOutcomeRecord, ScheduleDefinition, StoredDocument};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// SQLite storage backend
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens or creates the database at `path`
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Creates an in-memory database (for testing)
    #[cfg(test)]
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn schedule_from_row(row: &Row<'_>) -> rusqlite::Result<ScheduleDefinition> {
        let frequency: String = row.get(3)?;
        let options: String = row.get(4)?;
        let last: Option<String> = row.get(6)?;

        Ok(ScheduleDefinition {
            id: row.get(0)?,
            url: row.get(1)?,
            website_id: row.get(2)?,
            frequency: Frequency::from_db_string(&frequency).unwrap_or(Frequency::Daily),
            options: serde_json::from_str::<CrawlOptions>(&options).unwrap_or_default(),
            enabled: row.get::<_, i64>(5)? != 0,
            last_dispatched_at: last
                .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                .map(|dt| dt.with_timezone(&Utc)),
        })
    }
}

impl Store for SqliteStore {
    // ===== Documents =====

    fn upsert_document(&self, document: &Document) -> StorageResult<()> {
        let links = serde_json::to_string(&document.links)?;
        let now = Utc::now().to_rfc3339();

        self.conn().execute(
            "INSERT INTO documents (url, title, description, text, links, content_hash, rendered, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(url) DO UPDATE SET
                title = excluded.title,
                description = excluded.description,
                text = excluded.text,
                links = excluded.links,
                content_hash = excluded.content_hash,
                rendered = excluded.rendered,
                updated_at = excluded.updated_at",
            params![
                document.url,
                document.title,
                document.description,
                document.text,
                links,
                document.content_hash,
                document.rendered,
                now
            ],
        )?;
        Ok(())
    }

    fn get_document(&self, url: &str) -> StorageResult<Option<StoredDocument>> {
        let conn = self.conn();
        let row = conn
            .query_row(
                "SELECT url, title, description, text, links, content_hash, rendered, updated_at
                 FROM documents WHERE url = ?1",
                params![url],
                |row| {
                    Ok((
                        StoredDocument {
                            url: row.get(0)?,
                            title: row.get(1)?,
                            description: row.get(2)?,
                            text: row.get(3)?,
                            links: Vec::new(),
                            content_hash: row.get(5)?,
                            rendered: row.get(6)?,
                            updated_at: row.get(7)?,
                        },
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;

        match row {
            Some((mut document, links)) => {
                document.links = serde_json::from_str(&links)?;
                Ok(Some(document))
            }
            None => Ok(None),
        }
    }

    fn count_documents(&self) -> StorageResult<u64> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn upsert_embeddings(
        &self,
        url: &str,
        content_hash: &str,
        chunks: &[ChunkEmbedding],
    ) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        tx.execute(
            "DELETE FROM embeddings WHERE url = ?1 AND content_hash != ?2",
            params![url, content_hash],
        )?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO embeddings (url, content_hash, chunk_index, chunk_text, vector, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(url, content_hash, chunk_index) DO UPDATE SET
                    chunk_text = excluded.chunk_text,
                    vector = excluded.vector,
                    created_at = excluded.created_at",
            )?;
            for chunk in chunks {
                let vector = serde_json::to_string(&chunk.vector)?;
                stmt.execute(params![
                    url,
                    content_hash,
                    chunk.index as i64,
                    chunk.text,
                    vector,
                    now
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    fn count_embeddings(&self, url: &str) -> StorageResult<u64> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM embeddings WHERE url = ?1",
            params![url],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn delete_documents_before(&self, cutoff: DateTime<Utc>) -> StorageResult<u64> {
        let cutoff = cutoff.to_rfc3339();
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        tx.execute(
            "DELETE FROM embeddings WHERE url IN (
                SELECT url FROM documents WHERE julianday(updated_at) < julianday(?1)
             )",
            params![cutoff],
        )?;
        let deleted = tx.execute(
            "DELETE FROM documents WHERE julianday(updated_at) < julianday(?1)",
            params![cutoff],
        )?;

        tx.commit()?;
        Ok(deleted as u64)
    }

    // ===== Job outcomes =====

    fn record_job_outcome(
        &self,
        job_id: &str,
        job_type: &str,
        attempt: u32,
        outcome: &JobOutcome,
    ) -> StorageResult<()> {
        let report = outcome.report().map(serde_json::to_string).transpose()?;
        let now = Utc::now().to_rfc3339();

        self.conn().execute(
            "INSERT INTO job_outcomes (job_id, job_type, status, reason, report, attempts, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(job_id) DO UPDATE SET
                job_type = excluded.job_type,
                status = excluded.status,
                reason = excluded.reason,
                report = excluded.report,
                attempts = MAX(attempts, excluded.attempts),
                recorded_at = excluded.recorded_at",
            params![
                job_id,
                job_type,
                outcome.status().to_db_string(),
                outcome.reason(),
                report,
                attempt,
                now
            ],
        )?;
        Ok(())
    }

    fn get_job_outcome(&self, job_id: &str) -> StorageResult<Option<JobOutcomeRecord>> {
        let conn = self.conn();
        let row = conn
            .query_row(
                "SELECT job_id, job_type, status, reason, report, attempts, recorded_at
                 FROM job_outcomes WHERE job_id = ?1",
                params![job_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, u32>(5)?,
                        row.get::<_, String>(6)?,
                    ))
                },
            )
            .optional()?;

        let Some((job_id, job_type, status, reason, report, attempts, recorded_at)) = row else {
            return Ok(None);
        };

        let status = JobStatus::from_db_string(&status)
            .ok_or_else(|| StorageError::Database(format!("unknown job status '{}'", status)))?;
        let report = report
            .map(|r| serde_json::from_str::<JobReport>(&r))
            .transpose()?;

        Ok(Some(JobOutcomeRecord {
            job_id,
            job_type,
            status,
            reason,
            report,
            attempts,
            recorded_at,
        }))
    }

    fn count_outcomes_by_status(&self) -> StorageResult<HashMap<JobStatus, u64>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM job_outcomes GROUP BY status")?;

        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows
            .into_iter()
            .filter_map(|(status, count)| {
                JobStatus::from_db_string(&status).map(|s| (s, count as u64))
            })
            .collect())
    }

    fn delete_job_outcomes_before(
        &self,
        status: JobStatus,
        cutoff: DateTime<Utc>,
    ) -> StorageResult<u64> {
        let deleted = self.conn().execute(
            "DELETE FROM job_outcomes
             WHERE status = ?1 AND julianday(recorded_at) < julianday(?2)",
            params![status.to_db_string(), cutoff.to_rfc3339()],
        )?;
        Ok(deleted as u64)
    }

    // ===== Schedules =====

    fn get_schedules(&self) -> StorageResult<Vec<ScheduleDefinition>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, url, website_id, frequency, options, enabled, last_dispatched_at
             FROM schedules ORDER BY id",
        )?;

        let schedules = stmt
            .query_map([], Self::schedule_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(schedules)
    }

    fn get_schedule(&self, id: &str) -> StorageResult<Option<ScheduleDefinition>> {
        let schedule = self
            .conn()
            .query_row(
                "SELECT id, url, website_id, frequency, options, enabled, last_dispatched_at
                 FROM schedules WHERE id = ?1",
                params![id],
                Self::schedule_from_row,
            )
            .optional()?;
        Ok(schedule)
    }

    fn upsert_schedule(&self, schedule: &ScheduleDefinition) -> StorageResult<()> {
        let options = serde_json::to_string(&schedule.options)?;
        self.conn().execute(
            "INSERT INTO schedules (id, url, website_id, frequency, options, enabled, last_dispatched_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                url = excluded.url,
                website_id = excluded.website_id,
                frequency = excluded.frequency,
                options = excluded.options,
                enabled = excluded.enabled",
            params![
                schedule.id,
                schedule.url,
                schedule.website_id,
                schedule.frequency.to_db_string(),
                options,
                schedule.enabled,
                schedule.last_dispatched_at.map(|dt| dt.to_rfc3339())
            ],
        )?;
        Ok(())
    }

    fn mark_schedule_dispatched(&self, id: &str, at: DateTime<Utc>) -> StorageResult<()> {
        let updated = self.conn().execute(
            "UPDATE schedules SET last_dispatched_at = ?1 WHERE id = ?2",
            params![at.to_rfc3339(), id],
        )?;
        if updated == 0 {
            return Err(StorageError::NotFound(format!("schedule {}", id)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::content_hash;

    fn document(url: &str, text: &str) -> Document {
        Document {
            url: url.to_string(),
            title: Some("Title".to_string()),
            description: None,
            text: text.to_string(),
            links: vec!["https://example.com/next".to_string()],
            content_hash: content_hash(text),
            rendered: false,
        }
    }

    fn chunk(index: usize, text: &str) -> ChunkEmbedding {
        ChunkEmbedding {
            index,
            text: text.to_string(),
            vector: vec![0.1, 0.2, index as f32],
        }
    }

    #[test]
    fn test_upsert_document_is_idempotent() {
        let store = SqliteStore::new_in_memory().unwrap();
        let doc = document("https://example.com/", "hello world");

        store.upsert_document(&doc).unwrap();
        store.upsert_document(&doc).unwrap();
        assert_eq!(store.count_documents().unwrap(), 1);

        let stored = store.get_document("https://example.com/").unwrap().unwrap();
        assert_eq!(stored.text, "hello world");
        assert_eq!(stored.links, vec!["https://example.com/next".to_string()]);
        assert_eq!(stored.content_hash, doc.content_hash);
    }

    #[test]
    fn test_upsert_document_replaces_content() {
        let store = SqliteStore::new_in_memory().unwrap();
        store
            .upsert_document(&document("https://example.com/", "old"))
            .unwrap();
        store
            .upsert_document(&document("https://example.com/", "new"))
            .unwrap();

        let stored = store.get_document("https://example.com/").unwrap().unwrap();
        assert_eq!(stored.text, "new");
        assert_eq!(stored.content_hash, content_hash("new"));
        assert!(store.get_document("https://example.com/missing").unwrap().is_none());
    }

    #[test]
    fn test_embeddings_replace_older_versions() {
        let store = SqliteStore::new_in_memory().unwrap();
        let url = "https://example.com/";

        store
            .upsert_embeddings(url, "hash-a", &[chunk(0, "a"), chunk(1, "b")])
            .unwrap();
        store
            .upsert_embeddings(url, "hash-a", &[chunk(0, "a"), chunk(1, "b")])
            .unwrap();
        assert_eq!(store.count_embeddings(url).unwrap(), 2);

        store.upsert_embeddings(url, "hash-b", &[chunk(0, "c")]).unwrap();
        assert_eq!(store.count_embeddings(url).unwrap(), 1);
    }

    #[test]
    fn test_record_job_outcome_keeps_latest() {
        let store = SqliteStore::new_in_memory().unwrap();

        store
            .record_job_outcome(
                "job-1",
                "crawl",
                1,
                &JobOutcome::RedeliveryPending {
                    reason: "deadline".into(),
                },
            )
            .unwrap();

        let report = JobReport {
            pages_crawled: 3,
            ..JobReport::default()
        };
        store
            .record_job_outcome("job-1", "crawl", 2, &JobOutcome::Succeeded(report))
            .unwrap();

        let record = store.get_job_outcome("job-1").unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Succeeded);
        assert_eq!(record.attempts, 2);
        assert_eq!(record.report.unwrap().pages_crawled, 3);
        assert_eq!(record.reason, None);

        let counts = store.count_outcomes_by_status().unwrap();
        assert_eq!(counts.get(&JobStatus::Succeeded), Some(&1));
        assert_eq!(counts.get(&JobStatus::RedeliveryPending), None);
    }

    #[test]
    fn test_failed_outcome_keeps_reason() {
        let store = SqliteStore::new_in_memory().unwrap();
        store
            .record_job_outcome("job-2", "transcode", 1, &JobOutcome::failed("no executor"))
            .unwrap();

        let record = store.get_job_outcome("job-2").unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(record.reason.as_deref(), Some("no executor"));
        assert_eq!(record.job_type, "transcode");
    }

    fn backdate(store: &SqliteStore, sql: &str, key: &str, at: DateTime<Utc>) {
        store
            .conn()
            .execute(sql, params![at.to_rfc3339(), key])
            .unwrap();
    }

    #[test]
    fn test_delete_old_documents_and_their_embeddings() {
        let store = SqliteStore::new_in_memory().unwrap();
        let now = Utc::now();
        for url in ["https://example.com/old", "https://example.com/fresh"] {
            store.upsert_document(&document(url, url)).unwrap();
            store
                .upsert_embeddings(url, &content_hash(url), &[chunk(0, "a")])
                .unwrap();
        }
        backdate(
            &store,
            "UPDATE documents SET updated_at = ?1 WHERE url = ?2",
            "https://example.com/old",
            now - chrono::Duration::days(40),
        );

        let deleted = store
            .delete_documents_before(now - chrono::Duration::days(30))
            .unwrap();
        assert_eq!(deleted, 1);
        assert!(store.get_document("https://example.com/old").unwrap().is_none());
        assert_eq!(store.count_embeddings("https://example.com/old").unwrap(), 0);
        assert_eq!(store.count_embeddings("https://example.com/fresh").unwrap(), 1);
        assert_eq!(store.count_documents().unwrap(), 1);
    }

    #[test]
    fn test_delete_old_outcomes_by_status() {
        let store = SqliteStore::new_in_memory().unwrap();
        let now = Utc::now();
        store
            .record_job_outcome("old-failed", "crawl", 1, &JobOutcome::failed("boom"))
            .unwrap();
        store
            .record_job_outcome("new-failed", "crawl", 1, &JobOutcome::failed("boom"))
            .unwrap();
        store
            .record_job_outcome(
                "old-ok",
                "crawl",
                1,
                &JobOutcome::Succeeded(JobReport::default()),
            )
            .unwrap();
        for id in ["old-failed", "old-ok"] {
            backdate(
                &store,
                "UPDATE job_outcomes SET recorded_at = ?1 WHERE job_id = ?2",
                id,
                now - chrono::Duration::hours(48),
            );
        }

        let deleted = store
            .delete_job_outcomes_before(JobStatus::Failed, now - chrono::Duration::hours(24))
            .unwrap();
        assert_eq!(deleted, 1);
        assert!(store.get_job_outcome("old-failed").unwrap().is_none());
        assert!(store.get_job_outcome("new-failed").unwrap().is_some());
        assert!(store.get_job_outcome("old-ok").unwrap().is_some());
    }

    #[test]
    fn test_schedules_roundtrip_and_dispatch() {
        let store = SqliteStore::new_in_memory().unwrap();
        let mut schedule = ScheduleDefinition::new("weekly-docs", "https://docs.example.com/", Frequency::Weekly);
        schedule.options.max_pages = Some(20);
        store.upsert_schedule(&schedule).unwrap();

        let loaded = store.get_schedules().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].frequency, Frequency::Weekly);
        assert_eq!(loaded[0].options.max_pages, Some(20));
        assert!(loaded[0].last_dispatched_at.is_none());

        let at = Utc::now();
        store.mark_schedule_dispatched("weekly-docs", at).unwrap();
        let loaded = store.get_schedule("weekly-docs").unwrap().unwrap();
        assert_eq!(
            loaded.last_dispatched_at.map(|dt| dt.timestamp()),
            Some(at.timestamp())
        );

        // re-upserting the definition keeps the dispatch time
        store.upsert_schedule(&schedule).unwrap();
        assert!(store.get_schedule("weekly-docs").unwrap().unwrap().last_dispatched_at.is_some());

        assert!(matches!(
            store.mark_schedule_dispatched("missing", at),
            Err(StorageError::NotFound(_))
        ));
    }
}
