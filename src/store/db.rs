use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::functions::FunctionFlags;
use rusqlite::{Connection, params};

use super::{LeadStore, StageStore};
use crate::board::models::*;
use crate::errors::StoreError;

/// Async-safe handle to the lead database.
///
/// Wraps `LeadDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, so synchronous SQLite I/O never
/// ties up async worker threads.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<LeadDb>>,
}

impl DbHandle {
    pub fn new(db: LeadDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&LeadDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }

    /// Acquire the database mutex synchronously. Only for CLI setup commands
    /// and tests, never from a hot async path.
    pub fn lock_sync(&self) -> Result<std::sync::MutexGuard<'_, LeadDb>> {
        self.inner
            .lock()
            .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))
    }
}

/// Result of a guarded stage deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageDeletion {
    Deleted,
    InUse(usize),
    Missing,
}

pub struct LeadDb {
    conn: Connection,
}

impl LeadDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        // SQLite's lower() only folds ASCII; search must match `matches_search`.
        self.conn
            .create_scalar_function(
                "unicode_lower",
                1,
                FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
                |ctx| Ok(ctx.get::<Option<String>>(0)?.map(|s| s.to_lowercase())),
            )
            .context("Failed to register unicode_lower")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS pipelines (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    branch TEXT NOT NULL DEFAULT ''
                );

                CREATE TABLE IF NOT EXISTS stages (
                    id TEXT PRIMARY KEY,
                    pipeline_id TEXT NOT NULL REFERENCES pipelines(id) ON DELETE CASCADE,
                    name TEXT NOT NULL,
                    order_index INTEGER NOT NULL DEFAULT 0,
                    color TEXT
                );

                CREATE TABLE IF NOT EXISTS leads (
                    id TEXT PRIMARY KEY,
                    pipeline_id TEXT NOT NULL REFERENCES pipelines(id),
                    stage_id TEXT NOT NULL REFERENCES stages(id),
                    name TEXT NOT NULL,
                    phone TEXT NOT NULL DEFAULT '',
                    alt_phone TEXT,
                    location TEXT NOT NULL DEFAULT '',
                    age INTEGER,
                    status TEXT,
                    owner_id TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_stages_pipeline ON stages(pipeline_id, order_index);
                CREATE INDEX IF NOT EXISTS idx_leads_stage ON leads(stage_id, updated_at);
                CREATE INDEX IF NOT EXISTS idx_leads_owner ON leads(owner_id);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    // ── Pipelines ─────────────────────────────────────────────────────

    pub fn create_pipeline(&self, name: &str, branch: &str) -> Result<Pipeline> {
        let id = PipelineId::generate();
        self.conn
            .execute(
                "INSERT INTO pipelines (id, name, branch) VALUES (?1, ?2, ?3)",
                params![id.as_str(), name, branch],
            )
            .context("Failed to insert pipeline")?;
        Ok(Pipeline {
            id,
            name: name.to_string(),
            branch: branch.to_string(),
        })
    }

    pub fn list_pipelines(&self) -> Result<Vec<Pipeline>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, branch FROM pipelines ORDER BY name, id")
            .context("Failed to prepare list_pipelines")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Pipeline {
                    id: PipelineId::new(row.get::<_, String>(0)?),
                    name: row.get(1)?,
                    branch: row.get(2)?,
                })
            })
            .context("Failed to query pipelines")?;
        let mut pipelines = Vec::new();
        for row in rows {
            pipelines.push(row.context("Failed to read pipeline row")?);
        }
        Ok(pipelines)
    }

    // ── Stages ────────────────────────────────────────────────────────

    pub fn create_stage(&self, stage: &NewStage) -> Result<Stage> {
        let id = StageId::generate();
        self.conn
            .execute(
                "INSERT INTO stages (id, pipeline_id, name, order_index, color) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    id.as_str(),
                    stage.pipeline_id.as_str(),
                    stage.name,
                    stage.order_index,
                    stage.color
                ],
            )
            .context("Failed to insert stage")?;
        self.get_stage(&id)?.context("Stage not found after insert")
    }

    pub fn list_stages(&self, pipeline_id: &PipelineId) -> Result<Vec<Stage>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, name, pipeline_id, order_index, color FROM stages
                 WHERE pipeline_id = ?1 ORDER BY order_index, id",
            )
            .context("Failed to prepare list_stages")?;
        let rows = stmt
            .query_map(params![pipeline_id.as_str()], read_stage)
            .context("Failed to query stages")?;
        let mut stages = Vec::new();
        for row in rows {
            stages.push(row.context("Failed to read stage row")?);
        }
        Ok(stages)
    }

    pub fn get_stage(&self, id: &StageId) -> Result<Option<Stage>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, pipeline_id, order_index, color FROM stages WHERE id = ?1")
            .context("Failed to prepare get_stage")?;
        let mut rows = stmt
            .query_map(params![id.as_str()], read_stage)
            .context("Failed to query stage")?;
        match rows.next() {
            Some(row) => Ok(Some(row.context("Failed to read stage row")?)),
            None => Ok(None),
        }
    }

    pub fn update_stage(&self, id: &StageId, patch: &StagePatch) -> Result<Option<Stage>> {
        // Safety: DbHandle's Mutex already guarantees single-threaded access.
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        if let Some(name) = &patch.name {
            tx.execute(
                "UPDATE stages SET name = ?1 WHERE id = ?2",
                params![name, id.as_str()],
            )
            .context("Failed to update stage name")?;
        }
        if let Some(color) = &patch.color {
            tx.execute(
                "UPDATE stages SET color = ?1 WHERE id = ?2",
                params![color, id.as_str()],
            )
            .context("Failed to update stage color")?;
        }
        tx.commit().context("Failed to commit stage update")?;
        self.get_stage(id)
    }

    /// Delete a stage unless any lead still references it.
    pub fn delete_stage(&self, id: &StageId) -> Result<StageDeletion> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        let remaining = count_in_stage(&tx, id)?;
        if remaining > 0 {
            return Ok(StageDeletion::InUse(remaining));
        }
        let deleted = tx
            .execute("DELETE FROM stages WHERE id = ?1", params![id.as_str()])
            .context("Failed to delete stage")?;
        tx.commit().context("Failed to commit stage delete")?;
        Ok(if deleted > 0 {
            StageDeletion::Deleted
        } else {
            StageDeletion::Missing
        })
    }

    // ── Leads ─────────────────────────────────────────────────────────

    pub fn create_lead(&self, lead: &NewLead) -> Result<Lead> {
        let id = LeadId::generate();
        let now = format_ts(Utc::now());
        self.conn
            .execute(
                "INSERT INTO leads (id, pipeline_id, stage_id, name, phone, alt_phone, location, age, status, owner_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)",
                params![
                    id.as_str(),
                    lead.pipeline_id.as_str(),
                    lead.stage_id.as_str(),
                    lead.name,
                    lead.phone,
                    lead.alt_phone,
                    lead.location,
                    lead.age,
                    lead.status.map(|s| s.as_str()),
                    lead.owner_id.as_ref().map(|o| o.as_str()),
                    now,
                ],
            )
            .context("Failed to insert lead")?;
        self.get_lead(&id)?.context("Lead not found after insert")
    }

    pub fn get_lead(&self, id: &LeadId) -> Result<Option<Lead>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {LEAD_COLUMNS} FROM leads WHERE id = ?1"))
            .context("Failed to prepare get_lead")?;
        let mut rows = stmt
            .query_map(params![id.as_str()], read_lead_row)
            .context("Failed to query lead")?;
        match rows.next() {
            Some(row) => {
                let r = row.context("Failed to read lead row")?;
                Ok(Some(r.into_lead()?))
            }
            None => Ok(None),
        }
    }

    /// One page of a stage, newest update first, plus the filtered total.
    pub fn fetch_page(&self, query: &PageQuery) -> Result<LeadPage> {
        let needle = query.search.trim().to_lowercase();
        let pattern = format!("%{}%", escape_like(&needle));
        let owner = match &query.scope {
            OwnershipScope::All => None,
            OwnershipScope::OwnedBy(employee) => Some(employee.as_str().to_string()),
        };
        let filter = "stage_id = ?1 AND pipeline_id = ?2
             AND (?3 IS NULL OR owner_id = ?3)
             AND (?4 = ''
                  OR unicode_lower(name) LIKE ?5 ESCAPE '\\'
                  OR unicode_lower(phone) LIKE ?5 ESCAPE '\\'
                  OR unicode_lower(COALESCE(alt_phone, '')) LIKE ?5 ESCAPE '\\'
                  OR unicode_lower(location) LIKE ?5 ESCAPE '\\')";

        let total: i64 = self
            .conn
            .query_row(
                &format!("SELECT COUNT(*) FROM leads WHERE {filter}"),
                params![
                    query.stage_id.as_str(),
                    query.pipeline_id.as_str(),
                    owner,
                    needle,
                    pattern
                ],
                |row| row.get(0),
            )
            .context("Failed to count stage leads")?;

        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {LEAD_COLUMNS} FROM leads WHERE {filter}
                 ORDER BY updated_at DESC, id ASC LIMIT ?6 OFFSET ?7"
            ))
            .context("Failed to prepare fetch_page")?;
        let rows = stmt
            .query_map(
                params![
                    query.stage_id.as_str(),
                    query.pipeline_id.as_str(),
                    owner,
                    needle,
                    pattern,
                    query.limit as i64,
                    query.offset as i64
                ],
                read_lead_row,
            )
            .context("Failed to query stage page")?;
        let mut leads = Vec::new();
        for row in rows {
            let r = row.context("Failed to read lead row")?;
            leads.push(r.into_lead()?);
        }
        Ok(LeadPage {
            leads,
            total_count: total.max(0) as usize,
        })
    }

    /// Move a lead to another stage of the same pipeline.
    pub fn update_lead_stage(&self, id: &LeadId, stage_id: &StageId) -> Result<Option<Lead>> {
        let Some(lead) = self.get_lead(id)? else {
            return Ok(None);
        };
        let stage = self
            .get_stage(stage_id)?
            .with_context(|| format!("Stage {} not found", stage_id))?;
        if stage.pipeline_id != lead.pipeline_id {
            anyhow::bail!(
                "Stage {} belongs to pipeline {}, lead {} to {}",
                stage_id,
                stage.pipeline_id,
                id,
                lead.pipeline_id
            );
        }
        self.conn
            .execute(
                "UPDATE leads SET stage_id = ?1, updated_at = ?2 WHERE id = ?3",
                params![stage_id.as_str(), format_ts(Utc::now()), id.as_str()],
            )
            .context("Failed to move lead")?;
        self.get_lead(id)
    }

    pub fn count_leads_in_stage(&self, stage_id: &StageId) -> Result<usize> {
        count_in_stage(&self.conn, stage_id)
    }
}

const LEAD_COLUMNS: &str = "id, name, phone, alt_phone, location, age, status, stage_id, pipeline_id, owner_id, created_at, updated_at";

fn count_in_stage(conn: &Connection, stage_id: &StageId) -> Result<usize> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM leads WHERE stage_id = ?1",
            params![stage_id.as_str()],
            |row| row.get(0),
        )
        .context("Failed to count leads in stage")?;
    Ok(count.max(0) as usize)
}

fn read_stage(row: &rusqlite::Row<'_>) -> rusqlite::Result<Stage> {
    Ok(Stage {
        id: StageId::new(row.get::<_, String>(0)?),
        name: row.get(1)?,
        pipeline_id: PipelineId::new(row.get::<_, String>(2)?),
        order_index: row.get(3)?,
        color: row.get(4)?,
    })
}

fn read_lead_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<LeadRow> {
    Ok(LeadRow {
        id: row.get(0)?,
        name: row.get(1)?,
        phone: row.get(2)?,
        alt_phone: row.get(3)?,
        location: row.get(4)?,
        age: row.get(5)?,
        status: row.get(6)?,
        stage_id: row.get(7)?,
        pipeline_id: row.get(8)?,
        owner_id: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

/// Fixed-width UTC timestamps so that text ordering matches time ordering.
fn format_ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("Invalid timestamp: {}", raw))?
        .with_timezone(&Utc))
}

fn escape_like(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// Intermediate row struct for reading leads before converting ids,
/// status and timestamps into typed values.
struct LeadRow {
    id: String,
    name: String,
    phone: String,
    alt_phone: Option<String>,
    location: String,
    age: Option<u32>,
    status: Option<String>,
    stage_id: String,
    pipeline_id: String,
    owner_id: Option<String>,
    created_at: String,
    updated_at: String,
}

impl LeadRow {
    fn into_lead(self) -> Result<Lead> {
        let status = self
            .status
            .as_deref()
            .map(LeadStatus::from_str)
            .transpose()
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to parse lead status")?;
        Ok(Lead {
            id: LeadId::new(self.id),
            name: self.name,
            phone: self.phone,
            alt_phone: self.alt_phone,
            location: self.location,
            age: self.age,
            status,
            stage_id: StageId::new(self.stage_id),
            pipeline_id: PipelineId::new(self.pipeline_id),
            owner_id: self.owner_id.map(EmployeeId::new),
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
        })
    }
}

/// `LeadStore` / `StageStore` backed by SQLite.
#[derive(Clone)]
pub struct SqliteStore {
    db: DbHandle,
}

impl SqliteStore {
    pub fn new(db: DbHandle) -> Self {
        Self { db }
    }

    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::new(DbHandle::new(LeadDb::new(path)?)))
    }

    pub fn handle(&self) -> &DbHandle {
        &self.db
    }
}

#[async_trait]
impl LeadStore for SqliteStore {
    async fn fetch_page(&self, query: &PageQuery) -> Result<LeadPage, StoreError> {
        let query = query.clone();
        Ok(self.db.call(move |db| db.fetch_page(&query)).await?)
    }

    async fn update_lead_stage(
        &self,
        lead_id: &LeadId,
        stage_id: &StageId,
    ) -> Result<Lead, StoreError> {
        let (id, stage) = (lead_id.clone(), stage_id.clone());
        self.db
            .call(move |db| db.update_lead_stage(&id, &stage))
            .await?
            .ok_or_else(|| StoreError::NotFound {
                entity: "lead",
                id: lead_id.to_string(),
            })
    }

    async fn count_leads_in_stage(&self, stage_id: &StageId) -> Result<usize, StoreError> {
        let stage = stage_id.clone();
        Ok(self
            .db
            .call(move |db| db.count_leads_in_stage(&stage))
            .await?)
    }
}

#[async_trait]
impl StageStore for SqliteStore {
    async fn list_stages(&self, pipeline_id: &PipelineId) -> Result<Vec<Stage>, StoreError> {
        let pipeline = pipeline_id.clone();
        Ok(self.db.call(move |db| db.list_stages(&pipeline)).await?)
    }

    async fn create_stage(&self, stage: NewStage) -> Result<Stage, StoreError> {
        Ok(self.db.call(move |db| db.create_stage(&stage)).await?)
    }

    async fn update_stage(
        &self,
        stage_id: &StageId,
        patch: StagePatch,
    ) -> Result<Stage, StoreError> {
        let id = stage_id.clone();
        self.db
            .call(move |db| db.update_stage(&id, &patch))
            .await?
            .ok_or_else(|| StoreError::NotFound {
                entity: "stage",
                id: stage_id.to_string(),
            })
    }

    async fn delete_stage(&self, stage_id: &StageId) -> Result<(), StoreError> {
        let id = stage_id.clone();
        match self.db.call(move |db| db.delete_stage(&id)).await? {
            StageDeletion::Deleted => Ok(()),
            StageDeletion::InUse(remaining) => Err(StoreError::StageInUse {
                stage_id: stage_id.clone(),
                remaining,
            }),
            StageDeletion::Missing => Err(StoreError::NotFound {
                entity: "stage",
                id: stage_id.to_string(),
            }),
        }
    }
}
