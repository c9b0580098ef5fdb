use thiserror::Error;

use crate::schedule::time_window::TimeWindow;
use crate::schedule::types::{AssignmentId, ReasonCode, SlotId, TaskId};

/// A time-window representation that could not be parsed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid time window {input:?}: {reason}")]
pub struct InvalidTimeWindow {
    pub input: String,
    pub reason: &'static str,
}

impl InvalidTimeWindow {
    pub fn new(input: &str, reason: &'static str) -> Self {
        Self {
            input: input.to_string(),
            reason,
        }
    }
}

/// Why a helper cannot take a candidate task
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Conflict {
    #[error("overlaps task {with} ({window})")]
    TimeConflict { with: TaskId, window: TimeWindow },
    #[error("helper is already assigned to this task")]
    DuplicateAssignment,
    #[error("task has no remaining capacity")]
    CapacityExhausted,
    /// A task the helper already holds has a window that cannot be read,
    /// so an overlap cannot be ruled out
    #[error("held task {with}: {error}")]
    HeldTaskWindow {
        with: TaskId,
        #[source]
        error: InvalidTimeWindow,
    },
}

impl Conflict {
    pub fn reason_code(&self) -> ReasonCode {
        match self {
            Conflict::TimeConflict { .. } => ReasonCode::TimeConflict,
            Conflict::DuplicateAssignment => ReasonCode::DuplicateAssignment,
            Conflict::CapacityExhausted => ReasonCode::CapacityExhausted,
            Conflict::HeldTaskWindow { .. } => ReasonCode::InvalidTimeWindow,
        }
    }
}

/// Slot placement rule violations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SlotError {
    #[error("slot is full")]
    SlotFull,
    #[error("slot belongs to a different task")]
    WrongTask,
    #[error("assignment is already placed in a slot of this task")]
    AlreadyPlaced,
    #[error("assignment is not placed in this slot")]
    NotPlaced,
}

impl SlotError {
    pub fn code(&self) -> &'static str {
        match self {
            SlotError::SlotFull => "SlotFull",
            SlotError::WrongTask => "WrongTask",
            SlotError::AlreadyPlaced => "AlreadyPlaced",
            SlotError::NotPlaced => "NotPlaced",
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("assignment for helper {helper_id} and task {task_id} already exists")]
    Duplicate { helper_id: String, task_id: TaskId },
    #[error("stored data is invalid: {0}")]
    Corrupt(String),
    #[error("assignment {0} does not exist")]
    AssignmentGone(AssignmentId),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Failure of a manual assignment operation
#[derive(Debug, Error)]
pub enum AssignError {
    #[error(transparent)]
    Conflict(Conflict),
    #[error("unknown task {0}")]
    UnknownTask(TaskId),
    #[error(transparent)]
    InvalidTimeWindow(#[from] InvalidTimeWindow),
    #[error("assignment {0} not found")]
    NotFound(AssignmentId),
    #[error(transparent)]
    Store(StoreError),
}

impl From<Conflict> for AssignError {
    fn from(conflict: Conflict) -> Self {
        match conflict {
            Conflict::HeldTaskWindow { error, .. } => AssignError::InvalidTimeWindow(error),
            other => AssignError::Conflict(other),
        }
    }
}

impl From<StoreError> for AssignError {
    fn from(err: StoreError) -> Self {
        match err {
            // the store's uniqueness constraint decided a race
            StoreError::Duplicate { .. } => AssignError::Conflict(Conflict::DuplicateAssignment),
            other => AssignError::Store(other),
        }
    }
}

/// Failure of a slot operation
#[derive(Debug, Error)]
pub enum SlotOpError {
    #[error(transparent)]
    Rule(#[from] SlotError),
    #[error("assignment {0} not found")]
    AssignmentNotFound(AssignmentId),
    #[error("slot {0} not found")]
    SlotNotFound(SlotId),
    #[error("unknown task {0}")]
    UnknownTask(TaskId),
    #[error(transparent)]
    InvalidTimeWindow(#[from] InvalidTimeWindow),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors raised while importing CSV or JSON input
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("missing required column {0:?}")]
    MissingColumn(&'static str),
    #[error("row {row}: invalid {column} {value:?}")]
    InvalidField {
        row: usize,
        column: &'static str,
        value: String,
    },
    #[error("{0}")]
    Invalid(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("usage: festival-helpers assign <tasks.csv> <preferences.csv> [assignments.csv] | festival-helpers web [port]")]
    Usage,
    #[error("invalid port {0:?}")]
    InvalidPort(String),
}
