use crate::classifier::parse_form_fields;
use crate::error::{CoreError, Result};
use crate::model::{
    AuthConfig, AuthStrategy, DiscoveredApi, RunSummary, Scan, ScanStats, Status, StoredForm,
    StoredPage, Target, TestResult, TestRun, TestStatus, TestType, TrendPoint,
};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::fs;
use std::path::Path;
use surveyor_scanner::{DiscoveredForm, PageResult};

pub struct Database {
    conn: Connection,
}

fn current_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}

impl Database {
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;",
        )?;

        let db = Database { conn };
        db.init_schema()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let db = Database { conn };
        db.init_schema()?;
        Ok(db)
    }

    pub fn exists(path: &Path) -> bool {
        path.exists()
    }

    pub fn drop(path: &Path) {
        let _ = fs::remove_file(path);
        // WAL side files
        let _ = fs::remove_file(path.with_extension("db-wal"));
        let _ = fs::remove_file(path.with_extension("db-shm"));
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            "
CREATE TABLE IF NOT EXISTS targets (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    base_url TEXT NOT NULL,
    auth_type TEXT NOT NULL DEFAULT 'none'
        CHECK(auth_type IN ('none', 'form', 'basic', 'bearer', 'cookie')),
    auth_config TEXT NOT NULL DEFAULT '{}',
    settings TEXT NOT NULL DEFAULT '{}',
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS scans (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    target_id INTEGER NOT NULL,
    status TEXT NOT NULL CHECK(status IN ('running', 'done', 'error')),
    stats TEXT,
    started_at INTEGER NOT NULL,
    finished_at INTEGER,
    FOREIGN KEY(target_id) REFERENCES targets(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_scans_target ON scans(target_id);

CREATE TABLE IF NOT EXISTS discovered_pages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    scan_id INTEGER NOT NULL,
    url TEXT NOT NULL,
    title TEXT,
    status_code INTEGER,
    response_time INTEGER,
    has_forms BOOLEAN DEFAULT 0,
    is_auth_page BOOLEAN DEFAULT 0,
    ui_elements TEXT DEFAULT '{}',
    FOREIGN KEY(scan_id) REFERENCES scans(id) ON DELETE CASCADE,
    UNIQUE(scan_id, url)
);

CREATE TABLE IF NOT EXISTS discovered_apis (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    scan_id INTEGER NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    response_status INTEGER,
    response_type TEXT,
    requires_auth BOOLEAN DEFAULT 0,
    FOREIGN KEY(scan_id) REFERENCES scans(id) ON DELETE CASCADE,
    UNIQUE(scan_id, method, url)
);

CREATE TABLE IF NOT EXISTS discovered_forms (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    scan_id INTEGER NOT NULL,
    page_url TEXT NOT NULL,
    action TEXT NOT NULL,
    method TEXT NOT NULL,
    fields TEXT NOT NULL DEFAULT '[]',  -- JSON array of form fields
    is_login_form BOOLEAN DEFAULT 0,
    FOREIGN KEY(scan_id) REFERENCES scans(id) ON DELETE CASCADE,
    UNIQUE(scan_id, page_url, action, method)
);

CREATE TABLE IF NOT EXISTS test_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    target_id INTEGER NOT NULL,
    scan_id INTEGER NOT NULL,
    test_types TEXT NOT NULL,  -- JSON array
    ai_prompt TEXT,
    status TEXT NOT NULL CHECK(status IN ('running', 'done', 'error')),
    summary TEXT,
    started_at INTEGER NOT NULL,
    finished_at INTEGER,
    FOREIGN KEY(target_id) REFERENCES targets(id) ON DELETE CASCADE,
    FOREIGN KEY(scan_id) REFERENCES scans(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_test_runs_target ON test_runs(target_id);

CREATE TABLE IF NOT EXISTS test_results (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id INTEGER NOT NULL,
    category TEXT NOT NULL,
    test_name TEXT NOT NULL,
    status TEXT NOT NULL CHECK(status IN ('passed', 'failed', 'skipped')),
    duration INTEGER DEFAULT 0,
    error_message TEXT,
    FOREIGN KEY(run_id) REFERENCES test_runs(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_test_results_run ON test_results(run_id);
            ",
        )?;
        Ok(())
    }

    // Targets
    pub fn create_target(
        &self,
        name: &str,
        base_url: &str,
        auth_type: AuthStrategy,
        auth_config: &AuthConfig,
    ) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO targets (name, base_url, auth_type, auth_config, settings, created_at)
             VALUES (?1, ?2, ?3, ?4, '{}', ?5)",
            params![
                name,
                base_url,
                auth_type.as_str(),
                serde_json::to_string(auth_config)?,
                current_timestamp()
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn update_target_settings(&self, id: i64, settings: &serde_json::Value) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE targets SET settings = ?1 WHERE id = ?2",
            params![serde_json::to_string(settings)?, id],
        )?;
        if changed == 0 {
            return Err(CoreError::NotFound(format!("target {}", id)));
        }
        Ok(())
    }

    pub fn get_target(&self, id: i64) -> Result<Option<Target>> {
        let target = self
            .conn
            .query_row(
                "SELECT id, name, base_url, auth_type, auth_config, settings, created_at
                 FROM targets WHERE id = ?1",
                params![id],
                target_from_row,
            )
            .optional()?;
        Ok(target)
    }

    pub fn list_targets(&self) -> Result<Vec<Target>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, base_url, auth_type, auth_config, settings, created_at
             FROM targets ORDER BY id",
        )?;
        let targets = stmt
            .query_map([], target_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(targets)
    }

    /// Delete a target together with its scans, runs and their rows.
    pub fn delete_target(&self, id: i64) -> Result<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM targets WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }

    // Scans
    pub fn create_scan(&self, target_id: i64) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO scans (target_id, status, started_at) VALUES (?1, 'running', ?2)",
            params![target_id, current_timestamp()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Mark the scan done. Only the first terminal write takes effect; the
    /// return value says whether this call was it.
    pub fn finish_scan(&self, id: i64, stats: &ScanStats) -> Result<bool> {
        self.close_scan(id, Status::Done, stats)
    }

    pub fn fail_scan(&self, id: i64, message: &str) -> Result<bool> {
        self.close_scan(id, Status::Error, &ScanStats::failed(message))
    }

    fn close_scan(&self, id: i64, status: Status, stats: &ScanStats) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE scans SET status = ?1, stats = ?2, finished_at = ?3
             WHERE id = ?4 AND status = 'running'",
            params![
                status.as_str(),
                serde_json::to_string(stats)?,
                current_timestamp(),
                id
            ],
        )?;
        Ok(changed > 0)
    }

    pub fn get_scan(&self, id: i64) -> Result<Option<Scan>> {
        let scan = self
            .conn
            .query_row(
                "SELECT id, target_id, status, stats, started_at, finished_at
                 FROM scans WHERE id = ?1",
                params![id],
                scan_from_row,
            )
            .optional()?;
        Ok(scan)
    }

    pub fn scans_for_target(&self, target_id: i64) -> Result<Vec<Scan>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, target_id, status, stats, started_at, finished_at
             FROM scans WHERE target_id = ?1 ORDER BY id",
        )?;
        let scans = stmt
            .query_map(params![target_id], scan_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(scans)
    }

    /// Most recent successful scan of a target.
    pub fn latest_scan(&self, target_id: i64) -> Result<Option<Scan>> {
        let scan = self
            .conn
            .query_row(
                "SELECT id, target_id, status, stats, started_at, finished_at
                 FROM scans WHERE target_id = ?1 AND status = 'done'
                 ORDER BY id DESC LIMIT 1",
                params![target_id],
                scan_from_row,
            )
            .optional()?;
        Ok(scan)
    }

    // Discovered records
    pub fn insert_page(&self, scan_id: i64, page: &PageResult) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO discovered_pages (
                scan_id, url, title, status_code, response_time, has_forms, is_auth_page, ui_elements
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                scan_id,
                &page.url,
                &page.title,
                page.status_code,
                page.response_time_ms as i64,
                page.has_forms,
                page.is_auth_page,
                serde_json::to_string(&page.ui_elements)?,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn insert_api(&self, scan_id: i64, api: &DiscoveredApi) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO discovered_apis (scan_id, method, url, response_status, response_type, requires_auth)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                scan_id,
                &api.method,
                &api.url,
                api.status,
                &api.content_type,
                api.requires_auth
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn insert_form(&self, scan_id: i64, form: &DiscoveredForm) -> Result<i64> {
        self.insert_form_raw(
            scan_id,
            &form.page_url,
            &form.action,
            &form.method,
            &serde_json::to_string(&form.fields)?,
            form.is_login_form,
        )
    }

    /// Store a form whose field list is already serialized.
    pub fn insert_form_raw(
        &self,
        scan_id: i64,
        page_url: &str,
        action: &str,
        method: &str,
        fields_json: &str,
        is_login_form: bool,
    ) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO discovered_forms (scan_id, page_url, action, method, fields, is_login_form)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![scan_id, page_url, action, method, fields_json, is_login_form],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn pages_for_scan(&self, scan_id: i64) -> Result<Vec<StoredPage>> {
        let mut stmt = self.conn.prepare(
            "SELECT url, title, status_code, response_time, has_forms, is_auth_page, ui_elements
             FROM discovered_pages WHERE scan_id = ?1 ORDER BY id",
        )?;
        let pages = stmt
            .query_map(params![scan_id], |row| {
                let ui: Option<String> = row.get(6)?;
                Ok(StoredPage {
                    url: row.get(0)?,
                    title: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                    status_code: row.get::<_, Option<i64>>(2)?.unwrap_or(0) as u16,
                    response_time_ms: row.get::<_, Option<i64>>(3)?.unwrap_or(0).max(0) as u64,
                    has_forms: row.get(4)?,
                    is_auth_page: row.get(5)?,
                    ui_elements: ui
                        .and_then(|s| serde_json::from_str(&s).ok())
                        .unwrap_or_default(),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(pages)
    }

    pub fn apis_for_scan(&self, scan_id: i64) -> Result<Vec<DiscoveredApi>> {
        let mut stmt = self.conn.prepare(
            "SELECT method, url, response_status, response_type, requires_auth
             FROM discovered_apis WHERE scan_id = ?1 ORDER BY id",
        )?;
        let apis = stmt
            .query_map(params![scan_id], |row| {
                Ok(DiscoveredApi {
                    method: row.get(0)?,
                    url: row.get(1)?,
                    status: row.get::<_, Option<i64>>(2)?.unwrap_or(0) as u16,
                    content_type: row.get(3)?,
                    requires_auth: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(apis)
    }

    /// Forms of a scan. A field list that no longer parses comes back empty
    /// and never as a login form.
    pub fn forms_for_scan(&self, scan_id: i64) -> Result<Vec<StoredForm>> {
        let mut stmt = self.conn.prepare(
            "SELECT page_url, action, method, fields, is_login_form
             FROM discovered_forms WHERE scan_id = ?1 ORDER BY id",
        )?;
        let forms = stmt
            .query_map(params![scan_id], |row| {
                let raw: String = row.get(3)?;
                let stored_login: bool = row.get(4)?;
                let (fields, is_login_form) = match parse_form_fields(&raw) {
                    Some(fields) => (fields, stored_login),
                    None => (Vec::new(), false),
                };
                Ok(StoredForm {
                    page_url: row.get(0)?,
                    action: row.get(1)?,
                    method: row.get(2)?,
                    fields,
                    is_login_form,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(forms)
    }

    // Test runs
    pub fn create_run(
        &self,
        target_id: i64,
        scan_id: i64,
        test_types: &[TestType],
        ai_prompt: Option<&str>,
    ) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO test_runs (target_id, scan_id, test_types, ai_prompt, status, started_at)
             VALUES (?1, ?2, ?3, ?4, 'running', ?5)",
            params![
                target_id,
                scan_id,
                serde_json::to_string(test_types)?,
                ai_prompt,
                current_timestamp()
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn finish_run(&self, id: i64, summary: &RunSummary) -> Result<bool> {
        self.close_run(id, Status::Done, summary)
    }

    pub fn fail_run(&self, id: i64, message: &str) -> Result<bool> {
        self.close_run(id, Status::Error, &RunSummary::failed(message))
    }

    fn close_run(&self, id: i64, status: Status, summary: &RunSummary) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE test_runs SET status = ?1, summary = ?2, finished_at = ?3
             WHERE id = ?4 AND status = 'running'",
            params![
                status.as_str(),
                serde_json::to_string(summary)?,
                current_timestamp(),
                id
            ],
        )?;
        Ok(changed > 0)
    }

    pub fn get_run(&self, id: i64) -> Result<Option<TestRun>> {
        let run = self
            .conn
            .query_row(
                "SELECT id, target_id, scan_id, test_types, ai_prompt, status, summary, started_at, finished_at
                 FROM test_runs WHERE id = ?1",
                params![id],
                run_from_row,
            )
            .optional()?;
        Ok(run)
    }

    pub fn runs_for_target(&self, target_id: i64) -> Result<Vec<TestRun>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, target_id, scan_id, test_types, ai_prompt, status, summary, started_at, finished_at
             FROM test_runs WHERE target_id = ?1 ORDER BY id",
        )?;
        let runs = stmt
            .query_map(params![target_id], run_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(runs)
    }

    pub fn insert_test_result(&self, run_id: i64, result: &TestResult) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO test_results (run_id, category, test_name, status, duration, error_message)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                run_id,
                &result.category,
                &result.test_name,
                result.status.as_str(),
                result.duration_ms as i64,
                &result.error_message
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn results_for_run(&self, run_id: i64) -> Result<Vec<TestResult>> {
        let mut stmt = self.conn.prepare(
            "SELECT category, test_name, status, duration, error_message
             FROM test_results WHERE run_id = ?1 ORDER BY category, test_name, id",
        )?;
        let results = stmt
            .query_map(params![run_id], |row| {
                let status: String = row.get(2)?;
                Ok(TestResult {
                    category: row.get(0)?,
                    test_name: row.get(1)?,
                    status: TestStatus::from_runner(&status),
                    duration_ms: row.get::<_, Option<i64>>(3)?.unwrap_or(0).max(0) as u64,
                    error_message: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(results)
    }

    /// Summary computed from the stored result rows.
    pub fn summarize_run(&self, run_id: i64) -> Result<RunSummary> {
        let mut stmt = self
            .conn
            .prepare("SELECT status, COUNT(*) FROM test_results WHERE run_id = ?1 GROUP BY status")?;
        let counts = stmt
            .query_map(params![run_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut summary = RunSummary::default();
        for (status, count) in counts {
            let count = count as usize;
            match status.as_str() {
                "passed" => summary.passed = count,
                "failed" => summary.failed = count,
                "skipped" => summary.skipped = count,
                _ => {}
            }
            summary.total += count;
        }
        Ok(summary)
    }

    /// Pass rates of a target's finished runs, oldest first.
    pub fn trends(&self, target_id: i64) -> Result<Vec<TrendPoint>> {
        let points = self
            .runs_for_target(target_id)?
            .into_iter()
            .filter(|run| run.status == Status::Done)
            .map(|run| {
                let summary = run.summary.unwrap_or_default();
                TrendPoint {
                    run_id: run.id,
                    date: run.started_at,
                    total: summary.total,
                    passed: summary.passed,
                    failed: summary.failed,
                    skipped: summary.skipped,
                    pass_rate: summary.pass_rate(),
                    ai_prompt: run.ai_prompt,
                }
            })
            .collect();
        Ok(points)
    }

    pub fn get_connection(&self) -> &Connection {
        &self.conn
    }
}

fn target_from_row(row: &Row<'_>) -> rusqlite::Result<Target> {
    let auth_type: String = row.get(3)?;
    let auth_config: String = row.get(4)?;
    let settings: String = row.get(5)?;
    Ok(Target {
        id: row.get(0)?,
        name: row.get(1)?,
        base_url: row.get(2)?,
        auth_type: auth_type.parse().unwrap_or_default(),
        auth_config: serde_json::from_str(&auth_config).unwrap_or_default(),
        settings: serde_json::from_str(&settings).unwrap_or(serde_json::Value::Null),
        created_at: row.get(6)?,
    })
}

fn status_from(raw: &str) -> Status {
    raw.parse().unwrap_or(Status::Error)
}

fn scan_from_row(row: &Row<'_>) -> rusqlite::Result<Scan> {
    let status: String = row.get(2)?;
    let stats: Option<String> = row.get(3)?;
    Ok(Scan {
        id: row.get(0)?,
        target_id: row.get(1)?,
        status: status_from(&status),
        stats: stats.and_then(|s| serde_json::from_str(&s).ok()),
        started_at: row.get(4)?,
        finished_at: row.get(5)?,
    })
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<TestRun> {
    let test_types: String = row.get(3)?;
    let status: String = row.get(5)?;
    let summary: Option<String> = row.get(6)?;
    Ok(TestRun {
        id: row.get(0)?,
        target_id: row.get(1)?,
        scan_id: row.get(2)?,
        test_types: serde_json::from_str(&test_types).unwrap_or_default(),
        ai_prompt: row.get(4)?,
        status: status_from(&status),
        summary: summary.and_then(|s| serde_json::from_str(&s).ok()),
        started_at: row.get(7)?,
        finished_at: row.get(8)?,
    })
}
