use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{FromRow, SqlitePool};
use tokio::sync::Mutex;

use super::{AssignmentGuard, AssignmentStore, PreferenceRepository, SlotGuard, SlotStore, TaskRepository};
use crate::error::{Conflict, SlotError, StoreError, StoreResult};
use crate::schedule::time_window::TimeWindow;
use crate::schedule::types::{
    Assignment, AssignmentId, NewAssignment, NewSlot, Preference, Slot, SlotAssignment, SlotId,
    TaskRecord,
};

/// SQLite-backed store.
///
/// Writes that check before they insert take `write` first, so two requests
/// in this process never interleave between the check and the insert. The
/// UNIQUE constraints catch anything else.
pub struct SqliteStore {
    pool: SqlitePool,
    write: Mutex<()>,
}

// row structs for reading

#[derive(FromRow)]
struct TaskRow {
    id: String,
    title: String,
    time: String,
    capacity: i64,
}

#[derive(FromRow)]
struct PreferenceRow {
    id: String,
    helper_id: String,
    task_id: Option<String>,
    priority: Option<i64>,
    is_substitute: bool,
    desired_window: Option<String>,
    free_text: Option<String>,
}

#[derive(FromRow)]
struct AssignmentRow {
    id: i64,
    helper_id: String,
    task_id: String,
    via_substitute: bool,
    created_at: String,
}

#[derive(FromRow)]
struct SlotRow {
    id: i64,
    task_id: String,
    time: String,
    capacity: i64,
}

#[derive(FromRow)]
struct PlacementRow {
    slot_id: i64,
    assignment_id: i64,
}

fn capacity(value: i64) -> StoreResult<u32> {
    u32::try_from(value).map_err(|_| StoreError::Corrupt(format!("capacity {} out of range", value)))
}

impl TryFrom<TaskRow> for TaskRecord {
    type Error = StoreError;

    fn try_from(row: TaskRow) -> StoreResult<Self> {
        Ok(TaskRecord {
            id: row.id,
            title: row.title,
            time: row.time,
            capacity: capacity(row.capacity)?,
        })
    }
}

impl TryFrom<PreferenceRow> for Preference {
    type Error = StoreError;

    fn try_from(row: PreferenceRow) -> StoreResult<Self> {
        let priority = row
            .priority
            .map(|p| {
                u32::try_from(p).map_err(|_| StoreError::Corrupt(format!("priority {} out of range", p)))
            })
            .transpose()?;
        Ok(Preference {
            id: row.id,
            helper_id: row.helper_id,
            task_id: row.task_id,
            priority,
            is_substitute: row.is_substitute,
            desired_window: row.desired_window,
            free_text: row.free_text,
        })
    }
}

impl TryFrom<AssignmentRow> for Assignment {
    type Error = StoreError;

    fn try_from(row: AssignmentRow) -> StoreResult<Self> {
        let created_at = DateTime::parse_from_rfc3339(&row.created_at)
            .map_err(|e| StoreError::Corrupt(format!("assignment {} created_at: {}", row.id, e)))?
            .with_timezone(&Utc);
        Ok(Assignment {
            id: row.id,
            helper_id: row.helper_id,
            task_id: row.task_id,
            via_substitute: row.via_substitute,
            created_at,
        })
    }
}

impl TryFrom<SlotRow> for Slot {
    type Error = StoreError;

    fn try_from(row: SlotRow) -> StoreResult<Self> {
        let window = TimeWindow::parse(&row.time)
            .map_err(|e| StoreError::Corrupt(format!("slot {}: {}", row.id, e)))?;
        Ok(Slot {
            id: row.id,
            task_id: row.task_id,
            window,
            capacity: capacity(row.capacity)?,
        })
    }
}

impl From<PlacementRow> for SlotAssignment {
    fn from(row: PlacementRow) -> Self {
        SlotAssignment {
            slot_id: row.slot_id,
            assignment_id: row.assignment_id,
        }
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.is_unique_violation(),
        _ => false,
    }
}

fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.is_foreign_key_violation(),
        _ => false,
    }
}

const SELECT_ASSIGNMENTS: &str =
    "SELECT id, helper_id, task_id, via_substitute, created_at FROM assignments";

const SELECT_PLACEMENTS_FOR_TASK: &str = "SELECT sa.slot_id, sa.assignment_id
     FROM slot_assignments sa
     JOIN slots s ON s.id = sa.slot_id
     WHERE s.task_id = ?1
     ORDER BY sa.slot_id, sa.assignment_id";

impl SqliteStore {
    /// Opens (or creates) the database at `url` and runs the migrations.
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);

        // every connection to :memory: is its own database
        let in_memory = url.contains(":memory:");
        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 5 })
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;
        log::info!("sqlite store ready at {}", url);

        Ok(Self::from_pool(pool))
    }

    fn from_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            write: Mutex::new(()),
        }
    }
}

#[async_trait]
impl TaskRepository for SqliteStore {
    async fn list_tasks(&self) -> StoreResult<Vec<TaskRecord>> {
        let rows: Vec<TaskRow> =
            sqlx::query_as("SELECT id, title, time, capacity FROM tasks ORDER BY seq ASC")
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(TaskRecord::try_from).collect()
    }

    async fn replace_tasks(&self, tasks: Vec<TaskRecord>) -> StoreResult<()> {
        let _write = self.write.lock().await;
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM tasks").execute(&mut *tx).await?;
        for task in &tasks {
            sqlx::query("INSERT INTO tasks (id, title, time, capacity) VALUES (?1, ?2, ?3, ?4)")
                .bind(&task.id)
                .bind(&task.title)
                .bind(&task.time)
                .bind(i64::from(task.capacity))
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

async fn insert_preference(
    conn: &mut sqlx::SqliteConnection,
    preference: &Preference,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO preferences (
            id, helper_id, task_id, priority, is_substitute, desired_window, free_text
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )
    .bind(&preference.id)
    .bind(&preference.helper_id)
    .bind(&preference.task_id)
    .bind(preference.priority.map(i64::from))
    .bind(preference.is_substitute)
    .bind(&preference.desired_window)
    .bind(&preference.free_text)
    .execute(conn)
    .await?;
    Ok(())
}

#[async_trait]
impl PreferenceRepository for SqliteStore {
    async fn list_preferences(&self) -> StoreResult<Vec<Preference>> {
        let rows: Vec<PreferenceRow> = sqlx::query_as(
            "SELECT id, helper_id, task_id, priority, is_substitute, desired_window, free_text
             FROM preferences ORDER BY seq ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Preference::try_from).collect()
    }

    async fn submit_preference(&self, preference: Preference) -> StoreResult<()> {
        let mut conn = self.pool.acquire().await?;
        match insert_preference(&mut conn, &preference).await {
            Err(err) if is_unique_violation(&err) => Err(StoreError::Corrupt(format!(
                "preference {} already submitted",
                preference.id
            ))),
            other => Ok(other?),
        }
    }

    async fn replace_preferences(&self, preferences: Vec<Preference>) -> StoreResult<()> {
        let _write = self.write.lock().await;
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM preferences").execute(&mut *tx).await?;
        for preference in &preferences {
            insert_preference(&mut tx, preference).await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl AssignmentStore for SqliteStore {
    async fn list_assignments(&self) -> StoreResult<Vec<Assignment>> {
        let rows: Vec<AssignmentRow> = sqlx::query_as(&format!("{} ORDER BY id ASC", SELECT_ASSIGNMENTS))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Assignment::try_from).collect()
    }

    async fn get_assignment(&self, id: AssignmentId) -> StoreResult<Option<Assignment>> {
        let row: Option<AssignmentRow> = sqlx::query_as(&format!("{} WHERE id = ?1", SELECT_ASSIGNMENTS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Assignment::try_from).transpose()
    }

    async fn commit_batch(&self, batch: &[NewAssignment]) -> StoreResult<Vec<Assignment>> {
        let _write = self.write.lock().await;
        let mut tx = self.pool.begin().await?;
        let created_at = Utc::now();
        let stamp = created_at.to_rfc3339();

        let mut stored = Vec::with_capacity(batch.len());
        for new in batch {
            let result = sqlx::query(
                "INSERT INTO assignments (helper_id, task_id, via_substitute, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
            )
            .bind(&new.helper_id)
            .bind(&new.task_id)
            .bind(new.via_substitute)
            .bind(&stamp)
            .execute(&mut *tx)
            .await;

            // returning drops tx, which rolls back everything inserted so far
            let done = match result {
                Err(err) if is_unique_violation(&err) => {
                    return Err(StoreError::Duplicate {
                        helper_id: new.helper_id.clone(),
                        task_id: new.task_id.clone(),
                    })
                }
                other => other?,
            };
            stored.push(Assignment {
                id: done.last_insert_rowid(),
                helper_id: new.helper_id.clone(),
                task_id: new.task_id.clone(),
                via_substitute: new.via_substitute,
                created_at,
            });
        }

        tx.commit().await?;
        Ok(stored)
    }

    async fn insert_checked(
        &self,
        new: NewAssignment,
        guard: AssignmentGuard<'_>,
    ) -> StoreResult<Result<Assignment, Conflict>> {
        let _write = self.write.lock().await;
        let mut tx = self.pool.begin().await?;

        let rows: Vec<AssignmentRow> =
            sqlx::query_as(&format!("{} WHERE helper_id = ?1 ORDER BY id ASC", SELECT_ASSIGNMENTS))
                .bind(&new.helper_id)
                .fetch_all(&mut *tx)
                .await?;
        let held = rows
            .into_iter()
            .map(Assignment::try_from)
            .collect::<StoreResult<Vec<_>>>()?;
        if let Err(conflict) = guard(held.as_slice()) {
            return Ok(Err(conflict));
        }

        let created_at = Utc::now();
        let result = sqlx::query(
            "INSERT INTO assignments (helper_id, task_id, via_substitute, created_at)
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(&new.helper_id)
        .bind(&new.task_id)
        .bind(new.via_substitute)
        .bind(created_at.to_rfc3339())
        .execute(&mut *tx)
        .await;
        let done = match result {
            Err(err) if is_unique_violation(&err) => {
                return Err(StoreError::Duplicate {
                    helper_id: new.helper_id,
                    task_id: new.task_id,
                })
            }
            other => other?,
        };

        tx.commit().await?;
        Ok(Ok(Assignment {
            id: done.last_insert_rowid(),
            helper_id: new.helper_id,
            task_id: new.task_id,
            via_substitute: new.via_substitute,
            created_at,
        }))
    }

    async fn delete_assignment(&self, id: AssignmentId) -> StoreResult<bool> {
        // slot_assignments rows go with it (ON DELETE CASCADE)
        let result = sqlx::query("DELETE FROM assignments WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl SlotStore for SqliteStore {
    async fn create_slot(&self, slot: NewSlot) -> StoreResult<Slot> {
        let id = sqlx::query("INSERT INTO slots (task_id, time, capacity) VALUES (?1, ?2, ?3)")
            .bind(&slot.task_id)
            .bind(slot.window.to_string())
            .bind(i64::from(slot.capacity))
            .execute(&self.pool)
            .await?
            .last_insert_rowid();

        Ok(Slot {
            id,
            task_id: slot.task_id,
            window: slot.window,
            capacity: slot.capacity,
        })
    }

    async fn get_slot(&self, id: SlotId) -> StoreResult<Option<Slot>> {
        let row: Option<SlotRow> =
            sqlx::query_as("SELECT id, task_id, time, capacity FROM slots WHERE id = ?1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(Slot::try_from).transpose()
    }

    async fn slots_for_task(&self, task_id: &str) -> StoreResult<Vec<Slot>> {
        let rows: Vec<SlotRow> = sqlx::query_as(
            "SELECT id, task_id, time, capacity FROM slots WHERE task_id = ?1 ORDER BY id ASC",
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Slot::try_from).collect()
    }

    async fn placements_for_task(&self, task_id: &str) -> StoreResult<Vec<SlotAssignment>> {
        let rows: Vec<PlacementRow> = sqlx::query_as(SELECT_PLACEMENTS_FOR_TASK)
            .bind(task_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(SlotAssignment::from).collect())
    }

    async fn place_checked(
        &self,
        placement: SlotAssignment,
        task_id: &str,
        guard: SlotGuard<'_>,
    ) -> StoreResult<Result<(), SlotError>> {
        let _write = self.write.lock().await;
        let mut tx = self.pool.begin().await?;

        let rows: Vec<PlacementRow> = sqlx::query_as(SELECT_PLACEMENTS_FOR_TASK)
            .bind(task_id)
            .fetch_all(&mut *tx)
            .await?;
        let current: Vec<SlotAssignment> = rows.into_iter().map(SlotAssignment::from).collect();
        if let Err(err) = guard(current.as_slice()) {
            return Ok(Err(err));
        }

        let result = sqlx::query("INSERT INTO slot_assignments (slot_id, assignment_id) VALUES (?1, ?2)")
            .bind(placement.slot_id)
            .bind(placement.assignment_id)
            .execute(&mut *tx)
            .await;
        match result {
            Err(err) if is_unique_violation(&err) => return Ok(Err(SlotError::AlreadyPlaced)),
            Err(err) if is_foreign_key_violation(&err) => {
                return Err(StoreError::AssignmentGone(placement.assignment_id))
            }
            other => {
                other?;
            }
        }

        tx.commit().await?;
        Ok(Ok(()))
    }

    async fn remove_placement(&self, placement: SlotAssignment) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM slot_assignments WHERE slot_id = ?1 AND assignment_id = ?2")
            .bind(placement.slot_id)
            .bind(placement.assignment_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
