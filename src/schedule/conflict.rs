use std::collections::BTreeMap;

use super::types::{Assignment, NewAssignment, Snapshot, Task, TaskId};
use crate::error::{Conflict, InvalidTimeWindow};

/// Anything that says "this helper holds this task"
pub trait HeldTask {
    fn helper_id(&self) -> &str;
    fn task_id(&self) -> &str;
}

impl HeldTask for Assignment {
    fn helper_id(&self) -> &str {
        &self.helper_id
    }

    fn task_id(&self) -> &str {
        &self.task_id
    }
}

impl HeldTask for NewAssignment {
    fn helper_id(&self) -> &str {
        &self.helper_id
    }

    fn task_id(&self) -> &str {
        &self.task_id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapacityCheck {
    /// Engine path: reject once `committed` reaches the task's capacity
    Enforce { committed: usize },
    /// Manual path: planned capacity may be exceeded on purpose
    Skip,
}

/// Decides whether a helper may take a candidate task.
///
/// Pure over the task catalog and the assignments handed in, so the batch
/// engine and the manual path enforce exactly the same invariants.
pub struct ConflictChecker<'a> {
    tasks: &'a BTreeMap<TaskId, Task>,
    invalid: &'a BTreeMap<TaskId, InvalidTimeWindow>,
}

impl<'a> ConflictChecker<'a> {
    pub fn new(
        tasks: &'a BTreeMap<TaskId, Task>,
        invalid: &'a BTreeMap<TaskId, InvalidTimeWindow>,
    ) -> Self {
        Self { tasks, invalid }
    }

    pub fn for_snapshot(snapshot: &'a Snapshot) -> Self {
        Self::new(&snapshot.tasks, &snapshot.invalid_tasks)
    }

    /// Checks duplicate, then time overlap, then capacity.
    /// Entries in `existing` belonging to other helpers are ignored.
    pub fn check<'b, T, I>(
        &self,
        helper_id: &str,
        candidate: &Task,
        existing: I,
        capacity: CapacityCheck,
    ) -> Result<(), Conflict>
    where
        T: HeldTask + 'b,
        I: IntoIterator<Item = &'b T>,
    {
        let held: Vec<&T> = existing
            .into_iter()
            .filter(|a| a.helper_id() == helper_id)
            .collect();

        if held.iter().any(|a| a.task_id() == candidate.id) {
            return Err(Conflict::DuplicateAssignment);
        }

        for a in &held {
            if let Some(error) = self.invalid.get(a.task_id()) {
                return Err(Conflict::HeldTaskWindow {
                    with: a.task_id().to_string(),
                    error: error.clone(),
                });
            }
            let Some(task) = self.tasks.get(a.task_id()) else {
                log::warn!(
                    "helper {} holds unknown task {}, skipping its window",
                    helper_id,
                    a.task_id()
                );
                continue;
            };
            if task.window.overlaps(&candidate.window) {
                return Err(Conflict::TimeConflict {
                    with: task.id.clone(),
                    window: task.window,
                });
            }
        }

        if let CapacityCheck::Enforce { committed } = capacity {
            if committed >= candidate.capacity as usize {
                return Err(Conflict::CapacityExhausted);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::time_window::TimeWindow;
    use crate::schedule::types::ReasonCode;

    fn task(id: &str, time: &str, capacity: u32) -> Task {
        Task {
            id: id.to_string(),
            title: id.to_uppercase(),
            window: TimeWindow::parse(time).unwrap(),
            capacity,
        }
    }

    fn held(helper: &str, task: &str) -> NewAssignment {
        NewAssignment {
            helper_id: helper.to_string(),
            task_id: task.to_string(),
            via_substitute: false,
        }
    }

    fn catalog(tasks: &[Task]) -> BTreeMap<TaskId, Task> {
        tasks.iter().map(|t| (t.id.clone(), t.clone())).collect()
    }

    const NO_INVALID: &BTreeMap<TaskId, InvalidTimeWindow> = &BTreeMap::new();

    #[test]
    fn empty_history_is_ok() {
        let tasks = catalog(&[task("a", "09:00-11:00", 1)]);
        let checker = ConflictChecker::new(&tasks, NO_INVALID);
        let none: Vec<NewAssignment> = Vec::new();
        assert_eq!(
            checker.check("h1", &tasks["a"], &none, CapacityCheck::Enforce { committed: 0 }),
            Ok(())
        );
    }

    #[test]
    fn duplicate_wins_over_time_conflict() {
        let tasks = catalog(&[task("a", "09:00-11:00", 5)]);
        let checker = ConflictChecker::new(&tasks, NO_INVALID);
        let existing = vec![held("h1", "a")];
        assert_eq!(
            checker.check("h1", &tasks["a"], &existing, CapacityCheck::Skip),
            Err(Conflict::DuplicateAssignment)
        );
    }

    #[test]
    fn overlap_names_the_clashing_task() {
        let tasks = catalog(&[task("a", "09:00-11:00", 5), task("b", "10:00-12:00", 5)]);
        let checker = ConflictChecker::new(&tasks, NO_INVALID);
        let existing = vec![held("h1", "a")];
        assert_eq!(
            checker.check("h1", &tasks["b"], &existing, CapacityCheck::Skip),
            Err(Conflict::TimeConflict {
                with: "a".to_string(),
                window: tasks["a"].window,
            })
        );
    }

    #[test]
    fn other_helpers_and_touching_windows_are_fine() {
        let tasks = catalog(&[task("a", "09:00-10:00", 5), task("b", "10:00-11:00", 5)]);
        let checker = ConflictChecker::new(&tasks, NO_INVALID);
        let existing = vec![held("h1", "a"), held("h2", "b")];
        assert_eq!(checker.check("h1", &tasks["b"], &existing, CapacityCheck::Skip), Ok(()));
    }

    #[test]
    fn capacity_only_checked_when_enforced() {
        let tasks = catalog(&[task("a", "09:00-11:00", 2)]);
        let checker = ConflictChecker::new(&tasks, NO_INVALID);
        let none: Vec<NewAssignment> = Vec::new();
        assert_eq!(
            checker.check("h1", &tasks["a"], &none, CapacityCheck::Enforce { committed: 2 }),
            Err(Conflict::CapacityExhausted)
        );
        assert_eq!(checker.check("h1", &tasks["a"], &none, CapacityCheck::Skip), Ok(()));
    }

    #[test]
    fn split_day_allows_one_assignment_per_half() {
        let tasks = catalog(&[
            task("am", "vormittags", 5),
            task("pm", "nachmittags", 5),
            task("day", "ganztags", 5),
        ]);
        let checker = ConflictChecker::new(&tasks, NO_INVALID);
        let existing = vec![held("h1", "am")];
        assert_eq!(checker.check("h1", &tasks["pm"], &existing, CapacityCheck::Skip), Ok(()));
        assert!(matches!(
            checker.check("h1", &tasks["day"], &existing, CapacityCheck::Skip),
            Err(Conflict::TimeConflict { .. })
        ));
    }

    #[test]
    fn dangling_assignment_is_ignored() {
        let tasks = catalog(&[task("a", "09:00-11:00", 5)]);
        let checker = ConflictChecker::new(&tasks, NO_INVALID);
        let existing = vec![held("h1", "deleted-task")];
        assert_eq!(checker.check("h1", &tasks["a"], &existing, CapacityCheck::Skip), Ok(()));
    }

    #[test]
    fn held_task_with_unreadable_window_blocks() {
        let tasks = catalog(&[task("a", "09:00-11:00", 5)]);
        let invalid: BTreeMap<TaskId, InvalidTimeWindow> = [(
            "kaputt".to_string(),
            TimeWindow::parse("irgendwann").unwrap_err(),
        )]
        .into_iter()
        .collect();
        let checker = ConflictChecker::new(&tasks, &invalid);
        let existing = vec![held("h1", "kaputt")];

        let conflict = checker
            .check("h1", &tasks["a"], &existing, CapacityCheck::Skip)
            .unwrap_err();
        assert!(matches!(&conflict, Conflict::HeldTaskWindow { with, .. } if with == "kaputt"));
        assert_eq!(conflict.reason_code(), ReasonCode::InvalidTimeWindow);
        // other helpers are unaffected
        assert_eq!(checker.check("h2", &tasks["a"], &existing, CapacityCheck::Skip), Ok(()));
    }
}
