use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::time_window::TimeWindow;
use crate::error::InvalidTimeWindow;

pub type HelperId = String;
pub type TaskId = String;
pub type PreferenceId = String;
pub type AssignmentId = i64;
pub type SlotId = i64;

/// Task as delivered by task administration, window not yet parsed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub title: String,
    pub time: String,
    pub capacity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub window: TimeWindow,
    pub capacity: u32,
}

impl TryFrom<&TaskRecord> for Task {
    type Error = InvalidTimeWindow;

    fn try_from(record: &TaskRecord) -> Result<Self, Self::Error> {
        Ok(Task {
            id: record.id.clone(),
            title: record.title.clone(),
            window: TimeWindow::parse(&record.time)?,
            capacity: record.capacity,
        })
    }
}

/// A helper's wish to work a task, or to stand by as a substitute
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preference {
    pub id: PreferenceId,
    pub helper_id: HelperId,
    pub task_id: Option<TaskId>,
    pub priority: Option<u32>,
    pub is_substitute: bool,
    pub desired_window: Option<String>,
    pub free_text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub id: AssignmentId,
    pub helper_id: HelperId,
    pub task_id: TaskId,
    pub via_substitute: bool,
    pub created_at: DateTime<Utc>,
}

/// Assignment waiting to be inserted; the store allocates id and timestamp
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAssignment {
    pub helper_id: HelperId,
    pub task_id: TaskId,
    pub via_substitute: bool,
}

/// An assignment the engine wants to create, with the preference it satisfies
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposedAssignment {
    pub preference_id: PreferenceId,
    pub helper_id: HelperId,
    pub task_id: TaskId,
    pub via_substitute: bool,
}

impl From<&ProposedAssignment> for NewAssignment {
    fn from(p: &ProposedAssignment) -> Self {
        NewAssignment {
            helper_id: p.helper_id.clone(),
            task_id: p.task_id.clone(),
            via_substitute: p.via_substitute,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Slot {
    pub id: SlotId,
    pub task_id: TaskId,
    pub window: TimeWindow,
    pub capacity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSlot {
    pub task_id: TaskId,
    pub window: TimeWindow,
    pub capacity: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotAssignment {
    pub slot_id: SlotId,
    pub assignment_id: AssignmentId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReasonCode {
    TimeConflict,
    CapacityExhausted,
    DuplicateAssignment,
    InvalidTimeWindow,
    UnknownTask,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::TimeConflict => "TimeConflict",
            ReasonCode::CapacityExhausted => "CapacityExhausted",
            ReasonCode::DuplicateAssignment => "DuplicateAssignment",
            ReasonCode::InvalidTimeWindow => "InvalidTimeWindow",
            ReasonCode::UnknownTask => "UnknownTask",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Unassignable {
    pub id: PreferenceId,
    pub reason_code: ReasonCode,
}

/// Result record of a batch run, consumed by the reporting UI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    pub success: bool,
    pub total_assigned: usize,
    pub regular_assigned_count: usize,
    pub substitute_assigned_count: usize,
    pub unassignable: Vec<Unassignable>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

impl BatchResult {
    pub fn failed(error: impl Into<String>) -> Self {
        BatchResult {
            success: false,
            total_assigned: 0,
            regular_assigned_count: 0,
            substitute_assigned_count: 0,
            unassignable: Vec::new(),
            error: Some(error.into()),
        }
    }
}

/// Everything a batch run reads, captured once at the start of the run.
///
/// Time windows are parsed here and nowhere else.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub tasks: BTreeMap<TaskId, Task>,
    /// Tasks whose window failed to parse, with the parse error
    pub invalid_tasks: BTreeMap<TaskId, InvalidTimeWindow>,
    pub preferences: Vec<Preference>,
    /// Parsed `desired_window` of each preference, aligned by index
    pub desired_windows: Vec<Option<Result<TimeWindow, InvalidTimeWindow>>>,
    pub assignments: Vec<Assignment>,
}

impl Snapshot {
    pub fn ingest(
        task_records: &[TaskRecord],
        preferences: Vec<Preference>,
        assignments: Vec<Assignment>,
    ) -> Self {
        let mut tasks = BTreeMap::new();
        let mut invalid_tasks = BTreeMap::new();

        for record in task_records {
            if tasks.contains_key(&record.id) || invalid_tasks.contains_key(&record.id) {
                log::warn!("duplicate task id {} ignored", record.id);
                continue;
            }
            match Task::try_from(record) {
                Ok(task) => {
                    tasks.insert(task.id.clone(), task);
                }
                Err(err) => {
                    log::warn!("task {} ({}): {}", record.id, record.title, err);
                    invalid_tasks.insert(record.id.clone(), err);
                }
            }
        }

        let desired_windows = preferences
            .iter()
            .map(|p| {
                p.desired_window
                    .as_deref()
                    .filter(|raw| !raw.trim().is_empty())
                    .map(TimeWindow::parse)
            })
            .collect();

        Snapshot {
            tasks,
            invalid_tasks,
            preferences,
            desired_windows,
            assignments,
        }
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.get(id)
    }
}
