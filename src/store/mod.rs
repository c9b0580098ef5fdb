//! Repository ports the engine and the manual operations are wired against.
//!
//! Two implementations ship with the crate: [`memory::MemoryStore`] for the
//! CLI and tests, and [`sqlite::SqliteStore`] for the web server.

use async_trait::async_trait;

use crate::error::{Conflict, SlotError, StoreResult};
use crate::schedule::types::{
    Assignment, AssignmentId, NewAssignment, NewSlot, Preference, Slot, SlotAssignment, SlotId,
    TaskRecord,
};

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Runs against a helper's current assignments inside the store's write lock
pub type AssignmentGuard<'g> = &'g (dyn Fn(&[Assignment]) -> Result<(), Conflict> + Send + Sync);

/// Runs against the placements of a task's slots inside the store's write lock
pub type SlotGuard<'g> = &'g (dyn Fn(&[SlotAssignment]) -> Result<(), SlotError> + Send + Sync);

#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn list_tasks(&self) -> StoreResult<Vec<TaskRecord>>;

    /// Replaces the whole task catalog
    async fn replace_tasks(&self, tasks: Vec<TaskRecord>) -> StoreResult<()>;
}

#[async_trait]
pub trait PreferenceRepository: Send + Sync {
    /// All preferences in submission order
    async fn list_preferences(&self) -> StoreResult<Vec<Preference>>;

    async fn submit_preference(&self, preference: Preference) -> StoreResult<()>;

    async fn replace_preferences(&self, preferences: Vec<Preference>) -> StoreResult<()>;
}

#[async_trait]
pub trait AssignmentStore: Send + Sync {
    async fn list_assignments(&self) -> StoreResult<Vec<Assignment>>;

    async fn get_assignment(&self, id: AssignmentId) -> StoreResult<Option<Assignment>>;

    /// Stores every assignment of a batch, or none of them
    async fn commit_batch(&self, batch: &[NewAssignment]) -> StoreResult<Vec<Assignment>>;

    /// Check-then-insert for a single assignment. `guard` sees the helper's
    /// assignments as of the insert; a lost uniqueness race surfaces as
    /// `StoreError::Duplicate`.
    async fn insert_checked(
        &self,
        new: NewAssignment,
        guard: AssignmentGuard<'_>,
    ) -> StoreResult<Result<Assignment, Conflict>>;

    /// Removes the assignment and its slot placement. `false` if it did not exist.
    async fn delete_assignment(&self, id: AssignmentId) -> StoreResult<bool>;
}

#[async_trait]
pub trait SlotStore: Send + Sync {
    async fn create_slot(&self, slot: NewSlot) -> StoreResult<Slot>;

    async fn get_slot(&self, id: SlotId) -> StoreResult<Option<Slot>>;

    async fn slots_for_task(&self, task_id: &str) -> StoreResult<Vec<Slot>>;

    async fn placements_for_task(&self, task_id: &str) -> StoreResult<Vec<SlotAssignment>>;

    /// Check-then-insert for a placement; `guard` sees all placements of
    /// `task_id`'s slots. Fails with `StoreError::AssignmentGone` if the
    /// assignment was deleted in the meantime.
    async fn place_checked(
        &self,
        placement: SlotAssignment,
        task_id: &str,
        guard: SlotGuard<'_>,
    ) -> StoreResult<Result<(), SlotError>>;

    async fn remove_placement(&self, placement: SlotAssignment) -> StoreResult<bool>;
}
