use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;

use super::{AssignmentGuard, AssignmentStore, PreferenceRepository, SlotGuard, SlotStore, TaskRepository};
use crate::error::{Conflict, SlotError, StoreError, StoreResult};
use crate::schedule::types::{
    Assignment, AssignmentId, NewAssignment, NewSlot, Preference, Slot, SlotAssignment, SlotId,
    TaskRecord,
};

#[derive(Default)]
struct State {
    tasks: Vec<TaskRecord>,
    preferences: Vec<Preference>,
    assignments: Vec<Assignment>,
    slots: Vec<Slot>,
    placements: Vec<SlotAssignment>,
    next_assignment_id: AssignmentId,
    next_slot_id: SlotId,
}

impl State {
    fn has_pair(&self, helper_id: &str, task_id: &str) -> bool {
        self.assignments
            .iter()
            .any(|a| a.helper_id == helper_id && a.task_id == task_id)
    }

    fn insert(&mut self, new: &NewAssignment) -> Assignment {
        self.next_assignment_id += 1;
        let assignment = Assignment {
            id: self.next_assignment_id,
            helper_id: new.helper_id.clone(),
            task_id: new.task_id.clone(),
            via_substitute: new.via_substitute,
            created_at: Utc::now(),
        };
        self.assignments.push(assignment.clone());
        assignment
    }

    fn placements_for_task(&self, task_id: &str) -> Vec<SlotAssignment> {
        let slot_ids: HashSet<SlotId> = self
            .slots
            .iter()
            .filter(|s| s.task_id == task_id)
            .map(|s| s.id)
            .collect();
        self.placements
            .iter()
            .filter(|p| slot_ids.contains(&p.slot_id))
            .copied()
            .collect()
    }
}

fn check_seed(preferences: &[Preference], assignments: &[Assignment]) -> StoreResult<()> {
    let mut preference_ids = HashSet::new();
    if let Some(dup) = preferences.iter().find(|p| !preference_ids.insert(p.id.as_str())) {
        return Err(StoreError::Corrupt(format!("duplicate preference id {}", dup.id)));
    }
    let mut pairs = HashSet::new();
    if let Some(dup) = assignments
        .iter()
        .find(|a| !pairs.insert((a.helper_id.as_str(), a.task_id.as_str())))
    {
        return Err(StoreError::Duplicate {
            helper_id: dup.helper_id.clone(),
            task_id: dup.task_id.clone(),
        });
    }
    Ok(())
}

/// Everything in one mutex. Each trait method holds the lock for its whole
/// body, which is what makes check-then-insert atomic here.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a store, enforcing the same uniqueness rules as later writes
    pub fn with_data(
        tasks: Vec<TaskRecord>,
        preferences: Vec<Preference>,
        assignments: Vec<Assignment>,
    ) -> StoreResult<Self> {
        check_seed(&preferences, &assignments)?;
        let next_assignment_id = assignments.iter().map(|a| a.id).max().unwrap_or(0);
        Ok(Self {
            state: Mutex::new(State {
                tasks,
                preferences,
                assignments,
                next_assignment_id,
                ..State::default()
            }),
        })
    }

    fn state(&self) -> StoreResult<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl TaskRepository for MemoryStore {
    async fn list_tasks(&self) -> StoreResult<Vec<TaskRecord>> {
        Ok(self.state()?.tasks.clone())
    }

    async fn replace_tasks(&self, tasks: Vec<TaskRecord>) -> StoreResult<()> {
        self.state()?.tasks = tasks;
        Ok(())
    }
}

#[async_trait]
impl PreferenceRepository for MemoryStore {
    async fn list_preferences(&self) -> StoreResult<Vec<Preference>> {
        Ok(self.state()?.preferences.clone())
    }

    async fn submit_preference(&self, preference: Preference) -> StoreResult<()> {
        let mut state = self.state()?;
        if state.preferences.iter().any(|p| p.id == preference.id) {
            return Err(StoreError::Corrupt(format!(
                "preference {} already submitted",
                preference.id
            )));
        }
        state.preferences.push(preference);
        Ok(())
    }

    async fn replace_preferences(&self, preferences: Vec<Preference>) -> StoreResult<()> {
        self.state()?.preferences = preferences;
        Ok(())
    }
}

#[async_trait]
impl AssignmentStore for MemoryStore {
    async fn list_assignments(&self) -> StoreResult<Vec<Assignment>> {
        Ok(self.state()?.assignments.clone())
    }

    async fn get_assignment(&self, id: AssignmentId) -> StoreResult<Option<Assignment>> {
        Ok(self.state()?.assignments.iter().find(|a| a.id == id).cloned())
    }

    async fn commit_batch(&self, batch: &[NewAssignment]) -> StoreResult<Vec<Assignment>> {
        let mut state = self.state()?;

        // validate everything before touching anything
        let mut pending: HashSet<(&str, &str)> = HashSet::new();
        for new in batch {
            let pair = (new.helper_id.as_str(), new.task_id.as_str());
            if state.has_pair(pair.0, pair.1) || !pending.insert(pair) {
                return Err(StoreError::Duplicate {
                    helper_id: new.helper_id.clone(),
                    task_id: new.task_id.clone(),
                });
            }
        }

        Ok(batch.iter().map(|new| state.insert(new)).collect())
    }

    async fn insert_checked(
        &self,
        new: NewAssignment,
        guard: AssignmentGuard<'_>,
    ) -> StoreResult<Result<Assignment, Conflict>> {
        let mut state = self.state()?;
        let held: Vec<Assignment> = state
            .assignments
            .iter()
            .filter(|a| a.helper_id == new.helper_id)
            .cloned()
            .collect();
        if let Err(conflict) = guard(held.as_slice()) {
            return Ok(Err(conflict));
        }
        if state.has_pair(&new.helper_id, &new.task_id) {
            return Err(StoreError::Duplicate {
                helper_id: new.helper_id,
                task_id: new.task_id,
            });
        }
        Ok(Ok(state.insert(&new)))
    }

    async fn delete_assignment(&self, id: AssignmentId) -> StoreResult<bool> {
        let mut state = self.state()?;
        let before = state.assignments.len();
        state.assignments.retain(|a| a.id != id);
        let removed = state.assignments.len() != before;
        if removed {
            state.placements.retain(|p| p.assignment_id != id);
        }
        Ok(removed)
    }
}

#[async_trait]
impl SlotStore for MemoryStore {
    async fn create_slot(&self, slot: NewSlot) -> StoreResult<Slot> {
        let mut state = self.state()?;
        state.next_slot_id += 1;
        let slot = Slot {
            id: state.next_slot_id,
            task_id: slot.task_id,
            window: slot.window,
            capacity: slot.capacity,
        };
        state.slots.push(slot.clone());
        Ok(slot)
    }

    async fn get_slot(&self, id: SlotId) -> StoreResult<Option<Slot>> {
        Ok(self.state()?.slots.iter().find(|s| s.id == id).cloned())
    }

    async fn slots_for_task(&self, task_id: &str) -> StoreResult<Vec<Slot>> {
        Ok(self
            .state()?
            .slots
            .iter()
            .filter(|s| s.task_id == task_id)
            .cloned()
            .collect())
    }

    async fn placements_for_task(&self, task_id: &str) -> StoreResult<Vec<SlotAssignment>> {
        Ok(self.state()?.placements_for_task(task_id))
    }

    async fn place_checked(
        &self,
        placement: SlotAssignment,
        task_id: &str,
        guard: SlotGuard<'_>,
    ) -> StoreResult<Result<(), SlotError>> {
        let mut state = self.state()?;
        // deleted since the caller looked it up
        if !state.assignments.iter().any(|a| a.id == placement.assignment_id) {
            return Err(StoreError::AssignmentGone(placement.assignment_id));
        }
        let current = state.placements_for_task(task_id);
        if let Err(err) = guard(current.as_slice()) {
            return Ok(Err(err));
        }
        state.placements.push(placement);
        Ok(Ok(()))
    }

    async fn remove_placement(&self, placement: SlotAssignment) -> StoreResult<bool> {
        let mut state = self.state()?;
        let before = state.placements.len();
        state.placements.retain(|p| *p != placement);
        Ok(state.placements.len() != before)
    }
}
