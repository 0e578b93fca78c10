use std::sync::Mutex;

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};

use crate::error::{EngineError, ErrorCode};
use crate::persistence::Store;
use crate::persistence::models::*;

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

fn db_err(e: rusqlite::Error) -> EngineError {
    EngineError::new(ErrorCode::Fatal, format!("sqlite: {e}"))
}

fn now() -> String {
    Utc::now().to_rfc3339()
}

impl SqliteStore {
    pub fn open(path: &std::path::Path) -> Result<Self, EngineError> {
        let conn = Connection::open(path).map_err(db_err)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        store.seed_defaults()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, EngineError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        store.seed_defaults()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<(), EngineError> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA foreign_keys=ON;

            CREATE TABLE IF NOT EXISTS credentials (
                key        TEXT PRIMARY KEY,
                value      TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS settings (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS runs (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                started_at    TEXT NOT NULL,
                finished_at   TEXT,
                status        TEXT NOT NULL DEFAULT 'running',
                run_type      TEXT NOT NULL DEFAULT 'manual',
                source_folder TEXT DEFAULT 'INBOX',
                total         INTEGER DEFAULT 0,
                kept          INTEGER DEFAULT 0,
                filed         INTEGER DEFAULT 0,
                trashed       INTEGER DEFAULT 0,
                errors        INTEGER DEFAULT 0,
                skipped       INTEGER DEFAULT 0,
                job_id        INTEGER
            );
            CREATE TABLE IF NOT EXISTS actions (
                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id       INTEGER NOT NULL,
                uid          TEXT NOT NULL,
                from_addr    TEXT,
                subject      TEXT,
                action       TEXT NOT NULL,
                folder       TEXT,
                reason       TEXT,
                error_detail TEXT,
                created_at   TEXT NOT NULL,
                FOREIGN KEY (run_id) REFERENCES runs(id)
            );
            CREATE TABLE IF NOT EXISTS email_cache (
                hash          TEXT PRIMARY KEY,
                action        TEXT NOT NULL,
                folder        TEXT,
                reason        TEXT,
                classified_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS schedules (
                id                      INTEGER PRIMARY KEY AUTOINCREMENT,
                name                    TEXT NOT NULL,
                enabled                 INTEGER NOT NULL DEFAULT 1,
                interval_hours          INTEGER NOT NULL DEFAULT 24,
                interval_minutes        INTEGER,
                limit_per_run           INTEGER NOT NULL DEFAULT 50,
                folder                  TEXT NOT NULL DEFAULT 'INBOX',
                custom_prompt           TEXT DEFAULT '',
                delete_marketing_unread INTEGER NOT NULL DEFAULT 0,
                skip_flagged            INTEGER NOT NULL DEFAULT 1,
                next_run                TEXT,
                last_run                TEXT,
                created_at              TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS folder_jobs (
                id                      INTEGER PRIMARY KEY AUTOINCREMENT,
                name                    TEXT NOT NULL,
                folder                  TEXT NOT NULL,
                enabled                 INTEGER NOT NULL DEFAULT 1,
                status                  TEXT NOT NULL DEFAULT 'idle',
                batch_size              INTEGER NOT NULL DEFAULT 20,
                rate_limit_per_hour     INTEGER NOT NULL DEFAULT 60,
                oldest_first            INTEGER NOT NULL DEFAULT 1,
                start_from_days_ago     INTEGER,
                max_emails              INTEGER,
                custom_prompt           TEXT DEFAULT '',
                delete_marketing_unread INTEGER NOT NULL DEFAULT 0,
                skip_flagged            INTEGER NOT NULL DEFAULT 1,
                aggressive_trash        INTEGER NOT NULL DEFAULT 0,
                total_processed         INTEGER DEFAULT 0,
                total_remaining         INTEGER DEFAULT -1,
                last_run                TEXT,
                created_at              TEXT NOT NULL,
                completed_at            TEXT,
                session_id              TEXT
            );
            CREATE TABLE IF NOT EXISTS job_events (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id     INTEGER,
                run_id     INTEGER,
                session_id TEXT NOT NULL,
                event      TEXT NOT NULL,
                data       TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS worker_containers (
                id             INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id         INTEGER NOT NULL,
                run_id         INTEGER,
                container_id   TEXT,
                container_name TEXT,
                status         TEXT DEFAULT 'starting',
                created_at     TEXT NOT NULL,
                finished_at    TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_job_events_session ON job_events(session_id, id);
            "#,
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn seed_defaults(&self) -> Result<(), EngineError> {
        let conn = self.conn.lock().unwrap();
        let defaults = [
            ("rate_limit_per_hour", "200"),
            ("batch_delay_seconds", "5"),
            ("inbox_zero_mode", "1"),
            ("default_limit", "50"),
            ("parallel_batches", "3"),
            ("cache_ttl_days", "30"),
        ];
        for (k, v) in defaults {
            conn.execute(
                "INSERT OR IGNORE INTO settings (key, value) VALUES (?1, ?2)",
                params![k, v],
            )
            .map_err(db_err)?;
        }
        Ok(())
    }
}

fn row_to_run(row: &rusqlite::Row) -> rusqlite::Result<Run> {
    Ok(Run {
        id: row.get("id")?,
        started_at: row.get("started_at")?,
        finished_at: row.get("finished_at")?,
        status: row.get("status")?,
        run_type: row.get("run_type")?,
        source_folder: row.get("source_folder")?,
        total: row.get("total")?,
        kept: row.get("kept")?,
        filed: row.get("filed")?,
        trashed: row.get("trashed")?,
        errors: row.get("errors")?,
        skipped: row.get("skipped")?,
        job_id: row.get("job_id")?,
    })
}

fn row_to_folder_job(row: &rusqlite::Row) -> rusqlite::Result<FolderJob> {
    Ok(FolderJob {
        id: row.get("id")?,
        name: row.get("name")?,
        folder: row.get("folder")?,
        enabled: row.get::<_, i64>("enabled")? != 0,
        status: row.get("status")?,
        batch_size: row.get("batch_size")?,
        rate_limit_per_hour: row.get("rate_limit_per_hour")?,
        oldest_first: row.get::<_, i64>("oldest_first")? != 0,
        start_from_days_ago: row.get("start_from_days_ago")?,
        max_emails: row.get("max_emails")?,
        custom_prompt: row.get("custom_prompt")?,
        delete_marketing_unread: row.get::<_, i64>("delete_marketing_unread")? != 0,
        skip_flagged: row.get::<_, i64>("skip_flagged")? != 0,
        aggressive_trash: row.get::<_, i64>("aggressive_trash")? != 0,
        total_processed: row.get("total_processed")?,
        total_remaining: row.get("total_remaining")?,
        last_run: row.get("last_run")?,
        created_at: row.get("created_at")?,
        completed_at: row.get("completed_at")?,
        session_id: row.get("session_id")?,
    })
}

fn row_to_schedule(row: &rusqlite::Row) -> rusqlite::Result<Schedule> {
    Ok(Schedule {
        id: row.get("id")?,
        name: row.get("name")?,
        enabled: row.get::<_, i64>("enabled")? != 0,
        interval_hours: row.get("interval_hours")?,
        interval_minutes: row.get("interval_minutes")?,
        limit_per_run: row.get("limit_per_run")?,
        folder: row.get("folder")?,
        custom_prompt: row.get("custom_prompt")?,
        delete_marketing_unread: row.get::<_, i64>("delete_marketing_unread")? != 0,
        skip_flagged: row.get::<_, i64>("skip_flagged")? != 0,
        next_run: row.get("next_run")?,
        last_run: row.get("last_run")?,
        created_at: row.get("created_at")?,
    })
}

impl Store for SqliteStore {
    fn get_credential(&self, key: &str) -> Result<Option<String>, EngineError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT value FROM credentials WHERE key=?1",
            params![key],
            |r| r.get(0),
        )
        .optional()
        .map_err(db_err)
    }

    fn put_credential(&self, key: &str, value: &str) -> Result<(), EngineError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO credentials (key, value, updated_at) VALUES (?1, ?2, ?3)",
            params![key, value, now()],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn get_setting(&self, key: &str) -> Result<Option<String>, EngineError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT value FROM settings WHERE key=?1",
            params![key],
            |r| r.get(0),
        )
        .optional()
        .map_err(db_err)
    }

    fn put_setting(&self, key: &str, value: &str) -> Result<(), EngineError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO settings (key, value) VALUES (?1, ?2)",
            params![key, value],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn insert_run(
        &self,
        run_type: RunType,
        source_folder: &str,
        job_id: Option<i64>,
    ) -> Result<i64, EngineError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO runs (started_at, status, run_type, source_folder, job_id)
             VALUES (?1, 'running', ?2, ?3, ?4)",
            params![now(), run_type.as_str(), source_folder, job_id],
        )
        .map_err(db_err)?;
        Ok(conn.last_insert_rowid())
    }

    fn get_run(&self, run_id: i64) -> Result<Option<Run>, EngineError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT * FROM runs WHERE id=?1", params![run_id], row_to_run)
            .optional()
            .map_err(db_err)
    }

    fn update_run_counters(
        &self,
        run_id: i64,
        total: i64,
        kept: i64,
        filed: i64,
        trashed: i64,
        errors: i64,
        skipped: i64,
    ) -> Result<(), EngineError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE runs SET total=?1, kept=?2, filed=?3, trashed=?4, errors=?5, skipped=?6
             WHERE id=?7",
            params![total, kept, filed, trashed, errors, skipped, run_id],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn finish_run(&self, run_id: i64, status: RunStatus) -> Result<(), EngineError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE runs SET status=?1, finished_at=?2 WHERE id=?3",
            params![status.as_str(), now(), run_id],
        )
        .map_err(db_err)?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn insert_action(
        &self,
        run_id: i64,
        uid: &str,
        from_addr: Option<&str>,
        subject: Option<&str>,
        action: &str,
        folder: Option<&str>,
        reason: Option<&str>,
        error_detail: Option<&str>,
    ) -> Result<i64, EngineError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO actions
             (run_id, uid, from_addr, subject, action, folder, reason, error_detail, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                run_id,
                uid,
                from_addr,
                subject,
                action,
                folder,
                reason,
                error_detail,
                now()
            ],
        )
        .map_err(db_err)?;
        Ok(conn.last_insert_rowid())
    }

    fn scan_actions_for_run(&self, run_id: i64) -> Result<Vec<ActionRecord>, EngineError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT * FROM actions WHERE run_id=?1 ORDER BY id ASC")
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![run_id], |row| {
                Ok(ActionRecord {
                    id: row.get("id")?,
                    run_id: row.get("run_id")?,
                    uid: row.get("uid")?,
                    from_addr: row.get("from_addr")?,
                    subject: row.get("subject")?,
                    action: row.get("action")?,
                    folder: row.get("folder")?,
                    reason: row.get("reason")?,
                    error_detail: row.get("error_detail")?,
                    created_at: row.get("created_at")?,
                })
            })
            .map_err(db_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
    }

    fn get_cache_entry(
        &self,
        hash: &str,
        ttl_days: i64,
    ) -> Result<Option<CacheEntry>, EngineError> {
        let conn = self.conn.lock().unwrap();
        let entry = conn
            .query_row(
                "SELECT hash, action, folder, reason, classified_at FROM email_cache WHERE hash=?1",
                params![hash],
                |row| {
                    Ok(CacheEntry {
                        hash: row.get(0)?,
                        action: row.get(1)?,
                        folder: row.get(2)?,
                        reason: row.get(3)?,
                        classified_at: row.get(4)?,
                    })
                },
            )
            .optional()
            .map_err(db_err)?;

        let Some(entry) = entry else { return Ok(None) };
        if ttl_days <= 0 {
            return Ok(None);
        }
        let classified_at = chrono::DateTime::parse_from_rfc3339(&entry.classified_at)
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());
        let age = Utc::now().signed_duration_since(classified_at);
        if age.num_days() >= ttl_days {
            Ok(None)
        } else {
            Ok(Some(entry))
        }
    }

    fn put_cache_entry(
        &self,
        hash: &str,
        action: &str,
        folder: Option<&str>,
        reason: Option<&str>,
    ) -> Result<(), EngineError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO email_cache (hash, action, folder, reason, classified_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![hash, action, folder, reason, now()],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn scan_enabled_schedules(&self) -> Result<Vec<Schedule>, EngineError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT * FROM schedules WHERE enabled=1")
            .map_err(db_err)?;
        let rows = stmt.query_map([], row_to_schedule).map_err(db_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
    }

    fn update_schedule_next_run(
        &self,
        id: i64,
        next_run: &str,
        last_run: Option<&str>,
    ) -> Result<(), EngineError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE schedules SET next_run=?1, last_run=COALESCE(?2, last_run) WHERE id=?3",
            params![next_run, last_run, id],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn get_folder_job(&self, id: i64) -> Result<Option<FolderJob>, EngineError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT * FROM folder_jobs WHERE id=?1",
            params![id],
            row_to_folder_job,
        )
        .optional()
        .map_err(db_err)
    }

    fn scan_running_folder_jobs(&self) -> Result<Vec<FolderJob>, EngineError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT * FROM folder_jobs WHERE status='running' AND enabled=1")
            .map_err(db_err)?;
        let rows = stmt.query_map([], row_to_folder_job).map_err(db_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
    }

    fn set_folder_job_session(&self, id: i64, session_id: &str) -> Result<(), EngineError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE folder_jobs SET session_id=?1, status='running' WHERE id=?2",
            params![session_id, id],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn set_folder_job_status(&self, id: i64, status: FolderJobStatus) -> Result<(), EngineError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE folder_jobs SET status=?1 WHERE id=?2",
            params![status.as_str(), id],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn complete_folder_job(&self, id: i64, completed_at: &str) -> Result<(), EngineError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE folder_jobs SET status='completed', completed_at=?1, total_remaining=0
             WHERE id=?2",
            params![completed_at, id],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn bump_folder_job_progress(
        &self,
        id: i64,
        processed_delta: i64,
        last_run: &str,
    ) -> Result<(), EngineError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE folder_jobs SET total_processed = total_processed + ?1, last_run=?2
             WHERE id=?3",
            params![processed_delta, last_run, id],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn append_event(
        &self,
        job_id: Option<i64>,
        run_id: Option<i64>,
        session_id: &str,
        event: &str,
        data: &str,
    ) -> Result<i64, EngineError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO job_events (job_id, run_id, session_id, event, data, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![job_id, run_id, session_id, event, data, now()],
        )
        .map_err(db_err)?;
        Ok(conn.last_insert_rowid())
    }

    fn scan_events_since(
        &self,
        session_id: &str,
        after_id: i64,
    ) -> Result<Vec<JobEvent>, EngineError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT * FROM job_events WHERE session_id=?1 AND id>?2 ORDER BY id ASC",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![session_id, after_id], |row| {
                Ok(JobEvent {
                    id: row.get("id")?,
                    job_id: row.get("job_id")?,
                    run_id: row.get("run_id")?,
                    session_id: row.get("session_id")?,
                    event: row.get("event")?,
                    data: row.get("data")?,
                    created_at: row.get("created_at")?,
                })
            })
            .map_err(db_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
    }

    fn insert_worker_container(
        &self,
        job_id: i64,
        run_id: i64,
        container_name: &str,
    ) -> Result<i64, EngineError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO worker_containers (job_id, run_id, container_name, status, created_at)
             VALUES (?1, ?2, ?3, 'starting', ?4)",
            params![job_id, run_id, container_name, now()],
        )
        .map_err(db_err)?;
        Ok(conn.last_insert_rowid())
    }

    fn set_container_running(&self, id: i64, container_id: &str) -> Result<(), EngineError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE worker_containers SET container_id=?1, status='running' WHERE id=?2",
            params![container_id, id],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn finish_worker_container(&self, id: i64, status: ContainerStatus) -> Result<(), EngineError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE worker_containers SET status=?1, finished_at=?2 WHERE id=?3",
            params![status.as_str(), now(), id],
        )
        .map_err(db_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_round_trips() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert_eq!(store.get_credential("email").unwrap(), None);
        store.put_credential("email", "user@example.com").unwrap();
        assert_eq!(
            store.get_credential("email").unwrap(),
            Some("user@example.com".to_string())
        );
    }

    #[test]
    fn settings_are_seeded() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert_eq!(
            store.get_setting("rate_limit_per_hour").unwrap(),
            Some("200".to_string())
        );
    }

    #[test]
    fn run_counters_and_finish() {
        let store = SqliteStore::open_in_memory().unwrap();
        let run_id = store.insert_run(RunType::Manual, "INBOX", None).unwrap();
        store
            .update_run_counters(run_id, 5, 2, 1, 2, 0, 0)
            .unwrap();
        store.finish_run(run_id, RunStatus::Done).unwrap();
        let run = store.get_run(run_id).unwrap().unwrap();
        assert_eq!(run.total, 5);
        assert_eq!(run.status, "done");
        assert!(run.finished_at.is_some());
    }

    #[test]
    fn cache_entry_expires_by_ttl() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .put_cache_entry("hash1", "keep", None, Some("looks fine"))
            .unwrap();
        assert!(store.get_cache_entry("hash1", 30).unwrap().is_some());
        assert!(store.get_cache_entry("hash1", 0).unwrap().is_none());
    }

    #[test]
    fn job_events_scan_since_cursor_in_order() {
        let store = SqliteStore::open_in_memory().unwrap();
        let a = store
            .append_event(None, None, "sess-1", "status", "{}")
            .unwrap();
        let b = store
            .append_event(None, None, "sess-1", "action", "{}")
            .unwrap();
        assert!(b > a);
        let events = store.scan_events_since("sess-1", 0).unwrap();
        assert_eq!(events.len(), 2);
        assert!(events[0].id < events[1].id);
        let tail = store.scan_events_since("sess-1", a).unwrap();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].id, b);
    }

    #[test]
    fn actions_scan_for_run_returns_rows_in_insertion_order() {
        let store = SqliteStore::open_in_memory().unwrap();
        let run_id = store.insert_run(RunType::Manual, "INBOX", None).unwrap();
        let other_run = store.insert_run(RunType::Manual, "INBOX", None).unwrap();

        store
            .insert_action(
                run_id,
                "101",
                Some("a@example.com"),
                Some("Hello"),
                "keep",
                None,
                Some("looked fine"),
                None,
            )
            .unwrap();
        store
            .insert_action(
                run_id,
                "102",
                Some("b@example.com"),
                Some("Offer"),
                "trash_spam",
                None,
                Some("marketing"),
                None,
            )
            .unwrap();
        store
            .insert_action(other_run, "999", None, None, "keep", None, None, None)
            .unwrap();

        let actions = store.scan_actions_for_run(run_id).unwrap();
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[0].uid, "101");
        assert_eq!(actions[0].action, "keep");
        assert_eq!(actions[0].reason.as_deref(), Some("looked fine"));
        assert_eq!(actions[1].uid, "102");
        assert_eq!(actions[1].action, "trash_spam");
        assert!(actions[0].id < actions[1].id);
    }
}
