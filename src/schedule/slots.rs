use super::types::{Assignment, AssignmentId, Slot, SlotAssignment, SlotId};
use crate::error::SlotError;

/// Placement rules for the slots of a single task.
///
/// `placements` must hold every slot assignment recorded for that task; the
/// store hands them in under its lock so the check and the write are atomic.
pub struct SlotAllocator<'a> {
    placements: &'a [SlotAssignment],
}

impl<'a> SlotAllocator<'a> {
    pub fn new(placements: &'a [SlotAssignment]) -> Self {
        Self { placements }
    }

    pub fn occupancy(&self, slot_id: SlotId) -> usize {
        self.placements.iter().filter(|p| p.slot_id == slot_id).count()
    }

    pub fn slot_of(&self, assignment_id: AssignmentId) -> Option<SlotId> {
        self.placements
            .iter()
            .find(|p| p.assignment_id == assignment_id)
            .map(|p| p.slot_id)
    }

    pub fn check_place(&self, assignment: &Assignment, slot: &Slot) -> Result<(), SlotError> {
        if slot.task_id != assignment.task_id {
            return Err(SlotError::WrongTask);
        }
        if self.slot_of(assignment.id).is_some() {
            return Err(SlotError::AlreadyPlaced);
        }
        if self.occupancy(slot.id) >= slot.capacity as usize {
            return Err(SlotError::SlotFull);
        }
        Ok(())
    }

    pub fn check_remove(&self, assignment_id: AssignmentId, slot_id: SlotId) -> Result<(), SlotError> {
        let placed = self
            .placements
            .iter()
            .any(|p| p.assignment_id == assignment_id && p.slot_id == slot_id);
        if placed {
            Ok(())
        } else {
            Err(SlotError::NotPlaced)
        }
    }
}
