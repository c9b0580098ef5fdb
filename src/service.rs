//! Entry point for everything that touches stored data.
//!
//! The batch run and the manual operations share one `ConflictChecker`, so
//! the assignment invariants hold no matter which path created a row.

use std::collections::HashSet;
use std::sync::Arc;

use crate::error::{AssignError, ImportError, SlotError, SlotOpError, StoreError, StoreResult};
use crate::schedule::conflict::{CapacityCheck, ConflictChecker};
use crate::schedule::engine::{allocate, Allocation};
use crate::schedule::slots::SlotAllocator;
use crate::schedule::time_window::TimeWindow;
use crate::schedule::types::{
    Assignment, AssignmentId, BatchResult, NewAssignment, NewSlot, Preference, Slot,
    SlotAssignment, SlotId, Snapshot, Task, TaskRecord,
};
use crate::store::{AssignmentStore, PreferenceRepository, SlotStore, TaskRepository};

#[derive(Clone)]
pub struct AssignmentService {
    tasks: Arc<dyn TaskRepository>,
    preferences: Arc<dyn PreferenceRepository>,
    assignments: Arc<dyn AssignmentStore>,
    slots: Arc<dyn SlotStore>,
}

/// First record wins for duplicate ids, matching `Snapshot::ingest`.
fn resolve_task(records: &[TaskRecord], task_id: &str) -> Result<Task, AssignError> {
    let record = records
        .iter()
        .find(|r| r.id == task_id)
        .ok_or_else(|| AssignError::UnknownTask(task_id.to_string()))?;
    Ok(Task::try_from(record)?)
}

impl AssignmentService {
    pub fn new(
        tasks: Arc<dyn TaskRepository>,
        preferences: Arc<dyn PreferenceRepository>,
        assignments: Arc<dyn AssignmentStore>,
        slots: Arc<dyn SlotStore>,
    ) -> Self {
        Self {
            tasks,
            preferences,
            assignments,
            slots,
        }
    }

    /// Wires every repository to the same backing store
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: TaskRepository + PreferenceRepository + AssignmentStore + SlotStore + 'static,
    {
        Self::new(store.clone(), store.clone(), store.clone(), store)
    }

    pub async fn snapshot(&self) -> StoreResult<Snapshot> {
        let tasks = self.tasks.list_tasks().await?;
        let preferences = self.preferences.list_preferences().await?;
        let assignments = self.assignments.list_assignments().await?;
        Ok(Snapshot::ingest(&tasks, preferences, assignments))
    }

    /// Runs the allocation without storing anything
    pub async fn preview_batch(&self) -> StoreResult<Allocation> {
        let snapshot = self.snapshot().await?;
        Ok(allocate(&snapshot))
    }

    /// Allocates over a fresh snapshot and commits the proposal in one
    /// transaction. Store failures come back as `success: false`.
    pub async fn run_batch(&self) -> BatchResult {
        let snapshot = match self.snapshot().await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                log::error!("batch run aborted, could not read snapshot: {}", err);
                return BatchResult::failed(err.to_string());
            }
        };
        log::info!(
            "batch run over {} tasks, {} preferences, {} existing assignments",
            snapshot.tasks.len(),
            snapshot.preferences.len(),
            snapshot.assignments.len()
        );

        let allocation = allocate(&snapshot);
        let batch = allocation.new_assignments();
        let commit = self.assignments.commit_batch(&batch).await.map(|_| ());
        if let Err(err) = &commit {
            log::error!("batch commit of {} assignments failed, nothing stored: {}", batch.len(), err);
        }

        let (phase, result) = allocation.settle(commit);
        log::info!(
            "batch run {:?}: {} assigned ({} regular, {} substitute), {} unassignable",
            phase,
            result.total_assigned,
            result.regular_assigned_count,
            result.substitute_assigned_count,
            result.unassignable.len()
        );
        result
    }

    /// Creates one assignment by hand. Planned capacity may be exceeded here.
    pub async fn create_assignment(
        &self,
        helper_id: &str,
        task_id: &str,
    ) -> Result<Assignment, AssignError> {
        let records = self.tasks.list_tasks().await?;
        let task = resolve_task(&records, task_id)?;
        let catalog = Snapshot::ingest(&records, Vec::new(), Vec::new());
        let checker = ConflictChecker::for_snapshot(&catalog);

        let guard = |held: &[Assignment]| checker.check(helper_id, &task, held, CapacityCheck::Skip);
        let new = NewAssignment {
            helper_id: helper_id.to_string(),
            task_id: task.id.clone(),
            via_substitute: false,
        };

        match self.assignments.insert_checked(new, &guard).await? {
            Ok(assignment) => {
                log::info!(
                    "assignment {} created: {} -> {}",
                    assignment.id,
                    assignment.helper_id,
                    assignment.task_id
                );
                Ok(assignment)
            }
            Err(conflict) => {
                log::info!("assignment {} -> {} rejected: {}", helper_id, task_id, conflict);
                Err(conflict.into())
            }
        }
    }

    pub async fn delete_assignment(&self, id: AssignmentId) -> Result<(), AssignError> {
        if self.assignments.delete_assignment(id).await? {
            log::info!("assignment {} deleted", id);
            Ok(())
        } else {
            Err(AssignError::NotFound(id))
        }
    }

    pub async fn list_assignments(&self) -> StoreResult<Vec<Assignment>> {
        self.assignments.list_assignments().await
    }

    pub async fn create_slot(
        &self,
        task_id: &str,
        time: &str,
        capacity: u32,
    ) -> Result<Slot, SlotOpError> {
        let records = self.tasks.list_tasks().await?;
        if !records.iter().any(|r| r.id == task_id) {
            return Err(SlotOpError::UnknownTask(task_id.to_string()));
        }
        let window = TimeWindow::parse(time)?;

        let slot = self
            .slots
            .create_slot(NewSlot {
                task_id: task_id.to_string(),
                window,
                capacity,
            })
            .await?;
        log::info!("slot {} created for task {} ({})", slot.id, slot.task_id, slot.window);
        Ok(slot)
    }

    pub async fn slots_for_task(&self, task_id: &str) -> StoreResult<Vec<Slot>> {
        self.slots.slots_for_task(task_id).await
    }

    pub async fn place_in_slot(
        &self,
        assignment_id: AssignmentId,
        slot_id: SlotId,
    ) -> Result<SlotAssignment, SlotOpError> {
        let assignment = self
            .assignments
            .get_assignment(assignment_id)
            .await?
            .ok_or(SlotOpError::AssignmentNotFound(assignment_id))?;
        let slot = self
            .slots
            .get_slot(slot_id)
            .await?
            .ok_or(SlotOpError::SlotNotFound(slot_id))?;

        let placement = SlotAssignment {
            slot_id,
            assignment_id,
        };
        let guard = |current: &[SlotAssignment]| SlotAllocator::new(current).check_place(&assignment, &slot);
        match self.slots.place_checked(placement, &assignment.task_id, &guard).await {
            Ok(outcome) => outcome?,
            Err(StoreError::AssignmentGone(id)) => return Err(SlotOpError::AssignmentNotFound(id)),
            Err(err) => return Err(err.into()),
        }

        log::info!("assignment {} placed in slot {}", assignment_id, slot_id);
        Ok(placement)
    }

    pub async fn remove_from_slot(
        &self,
        assignment_id: AssignmentId,
        slot_id: SlotId,
    ) -> Result<(), SlotOpError> {
        let slot = self
            .slots
            .get_slot(slot_id)
            .await?
            .ok_or(SlotOpError::SlotNotFound(slot_id))?;
        let placements = self.slots.placements_for_task(&slot.task_id).await?;
        SlotAllocator::new(&placements).check_remove(assignment_id, slot_id)?;

        let placement = SlotAssignment {
            slot_id,
            assignment_id,
        };
        if !self.slots.remove_placement(placement).await? {
            // removed concurrently between the check and the delete
            return Err(SlotError::NotPlaced.into());
        }
        log::info!("assignment {} removed from slot {}", assignment_id, slot_id);
        Ok(())
    }

    /// Replaces the task catalog. Windows are validated later, per snapshot.
    pub async fn import_tasks(&self, tasks: Vec<TaskRecord>) -> Result<usize, ImportError> {
        let count = tasks.len();
        self.tasks.replace_tasks(tasks).await?;
        log::info!("imported {} tasks", count);
        Ok(count)
    }

    pub async fn import_preferences(&self, preferences: Vec<Preference>) -> Result<usize, ImportError> {
        let mut seen = HashSet::new();
        if let Some(dup) = preferences.iter().find(|p| !seen.insert(p.id.as_str())) {
            return Err(ImportError::Invalid(format!("duplicate preference id {}", dup.id)));
        }

        let count = preferences.len();
        self.preferences.replace_preferences(preferences).await?;
        log::info!("imported {} preferences", count);
        Ok(count)
    }

    pub async fn submit_preference(&self, preference: Preference) -> StoreResult<()> {
        log::debug!("preference {} submitted by {}", preference.id, preference.helper_id);
        self.preferences.submit_preference(preference).await
    }
}
