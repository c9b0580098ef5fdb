use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use serde::Serialize;

use super::conflict::{CapacityCheck, ConflictChecker};
use super::queue::{PreferenceQueue, QueuedPreference};
use super::time_window::TimeWindow;
use super::types::{
    BatchResult, HelperId, NewAssignment, ProposedAssignment, ReasonCode, Snapshot, Task, TaskId,
    Unassignable,
};
use crate::error::Conflict;

/// Where a batch run stands. Each pass is a visible transition:
/// everyone-once (pass 1) always completes before anyone-twice (pass 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Phase {
    Init,
    RegularPass1,
    RegularPass2,
    SubstitutePass1,
    SubstitutePass2,
    Committed,
    Failed,
}

/// One batch run over a snapshot.
///
/// `phase` names the last pass that ran. Proposals are only held in memory;
/// nothing is written until the caller commits the finished [`Allocation`].
pub struct AllocationRun<'a> {
    snapshot: &'a Snapshot,
    queue: PreferenceQueue<'a>,
    phase: Phase,
    /// Existing and proposed holdings per helper
    held: BTreeMap<HelperId, Vec<NewAssignment>>,
    /// Existing and proposed headcount per task
    filled: HashMap<TaskId, usize>,
    proposed: Vec<ProposedAssignment>,
    /// Helpers that received an assignment in this run
    served: HashSet<HelperId>,
    /// Submission sequence numbers of satisfied preferences
    satisfied: HashSet<usize>,
    last_reason: HashMap<usize, ReasonCode>,
    regular_assigned: usize,
    substitute_assigned: usize,
}

impl<'a> AllocationRun<'a> {
    pub fn new(snapshot: &'a Snapshot) -> Self {
        let mut held: BTreeMap<HelperId, Vec<NewAssignment>> = BTreeMap::new();
        let mut filled: HashMap<TaskId, usize> = HashMap::new();
        for a in &snapshot.assignments {
            held.entry(a.helper_id.clone()).or_default().push(NewAssignment {
                helper_id: a.helper_id.clone(),
                task_id: a.task_id.clone(),
                via_substitute: a.via_substitute,
            });
            *filled.entry(a.task_id.clone()).or_default() += 1;
        }

        Self {
            snapshot,
            queue: PreferenceQueue::new(&snapshot.preferences),
            phase: Phase::Init,
            held,
            filled,
            proposed: Vec::new(),
            served: HashSet::new(),
            satisfied: HashSet::new(),
            last_reason: HashMap::new(),
            regular_assigned: 0,
            substitute_assigned: 0,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn proposed(&self) -> &[ProposedAssignment] {
        &self.proposed
    }

    /// Runs the next pass. Returns the phase reached, or `None` once all
    /// passes are done.
    pub fn step(&mut self) -> Option<Phase> {
        let current = self.phase;
        let next = match current {
            Phase::Init => {
                self.first_pass(false);
                Phase::RegularPass1
            }
            Phase::RegularPass1 => {
                self.additional_pass(false);
                Phase::RegularPass2
            }
            Phase::RegularPass2 => {
                self.first_pass(true);
                Phase::SubstitutePass1
            }
            Phase::SubstitutePass1 => {
                self.additional_pass(true);
                Phase::SubstitutePass2
            }
            Phase::SubstitutePass2 | Phase::Committed | Phase::Failed => return None,
        };
        log::debug!(
            "{:?} done: {} proposed so far ({} regular, {} substitute)",
            next,
            self.proposed.len(),
            self.regular_assigned,
            self.substitute_assigned
        );
        self.phase = next;
        Some(next)
    }

    /// Runs the remaining passes and hands back the proposal
    pub fn finish(mut self) -> Allocation {
        while self.step().is_some() {}

        let unassignable: Vec<Unassignable> = self
            .queue
            .regular()
            .iter()
            .chain(self.queue.substitute())
            .filter(|q| !self.satisfied.contains(&q.seq))
            .map(|q| Unassignable {
                id: q.preference.id.clone(),
                reason_code: self
                    .last_reason
                    .get(&q.seq)
                    .copied()
                    .unwrap_or(ReasonCode::CapacityExhausted),
            })
            .collect();

        log::info!(
            "allocation finished: {} regular, {} substitute, {} unassignable",
            self.regular_assigned,
            self.substitute_assigned,
            unassignable.len()
        );

        Allocation {
            proposed: self.proposed,
            regular_assigned: self.regular_assigned,
            substitute_assigned: self.substitute_assigned,
            unassignable,
        }
    }

    /// Only helpers without an assignment in this run get a turn
    fn first_pass(&mut self, substitute: bool) {
        let round = if substitute {
            self.queue.next_substitute_round(&self.served)
        } else {
            self.queue.next_regular_round(&self.served)
        };

        for q in round {
            // served earlier in this round; pass 2 will retry
            if self.served.contains(&q.preference.helper_id) {
                continue;
            }
            self.try_preference(q);
        }
    }

    /// Everyone left, repeated until a full sweep assigns nothing
    fn additional_pass(&mut self, substitute: bool) {
        let queue: Vec<QueuedPreference<'a>> = if substitute {
            self.queue.substitute().to_vec()
        } else {
            self.queue.regular().to_vec()
        };

        loop {
            let mut progressed = false;
            for q in &queue {
                if self.satisfied.contains(&q.seq) {
                    continue;
                }
                progressed |= self.try_preference(*q);
            }
            if !progressed {
                break;
            }
        }
    }

    fn try_preference(&mut self, q: QueuedPreference<'a>) -> bool {
        match self.attempt(q) {
            Ok(task_id) => {
                self.assign(q, task_id);
                true
            }
            Err(reason) => {
                self.last_reason.insert(q.seq, reason);
                false
            }
        }
    }

    fn attempt(&self, q: QueuedPreference<'a>) -> Result<TaskId, ReasonCode> {
        let pref = q.preference;

        let desired = if pref.is_substitute {
            match self.snapshot.desired_windows.get(q.seq).and_then(Option::as_ref) {
                Some(Ok(window)) => Some(*window),
                Some(Err(_)) => return Err(ReasonCode::InvalidTimeWindow),
                None => None,
            }
        } else {
            None
        };

        match &pref.task_id {
            Some(task_id) => {
                let task = self.resolve(task_id)?;
                self.check(&pref.helper_id, task)
                    .map_err(|c| c.reason_code())?;
                Ok(task.id.clone())
            }
            None if pref.is_substitute => self.pick_open_task(&pref.helper_id, desired.as_ref()),
            // a regular preference must name its task
            None => Err(ReasonCode::InvalidTimeWindow),
        }
    }

    fn resolve(&self, task_id: &str) -> Result<&'a Task, ReasonCode> {
        let snapshot = self.snapshot;
        if snapshot.invalid_tasks.contains_key(task_id) {
            return Err(ReasonCode::InvalidTimeWindow);
        }
        snapshot.task(task_id).ok_or(ReasonCode::UnknownTask)
    }

    fn check(&self, helper_id: &str, task: &Task) -> Result<(), Conflict> {
        let checker = ConflictChecker::for_snapshot(self.snapshot);
        let held: &[NewAssignment] = self.held.get(helper_id).map(Vec::as_slice).unwrap_or(&[]);
        checker.check(
            helper_id,
            task,
            held,
            CapacityCheck::Enforce {
                committed: self.filled(&task.id),
            },
        )
    }

    fn filled(&self, task_id: &str) -> usize {
        self.filled.get(task_id).copied().unwrap_or(0)
    }

    fn open_seats(&self, task: &Task) -> usize {
        (task.capacity as usize).saturating_sub(self.filled(&task.id))
    }

    /// Floater placement: the task with the most open seats wins, ties by
    /// title. The first candidate that passes the checker is taken; if none
    /// does, the best candidate's rejection is reported.
    fn pick_open_task(
        &self,
        helper_id: &str,
        desired: Option<&TimeWindow>,
    ) -> Result<TaskId, ReasonCode> {
        let mut candidates: Vec<&Task> = self
            .snapshot
            .tasks
            .values()
            .filter(|t| self.open_seats(t) > 0)
            .filter(|t| desired.map_or(true, |w| w.contains(&t.window)))
            .collect();

        candidates.sort_by(|a, b| {
            self.open_seats(b)
                .cmp(&self.open_seats(a))
                .then_with(|| a.title.cmp(&b.title))
                .then_with(|| a.id.cmp(&b.id))
        });

        let mut first_rejection = None;
        for task in candidates {
            match self.check(helper_id, task) {
                Ok(()) => return Ok(task.id.clone()),
                Err(conflict) => {
                    first_rejection.get_or_insert(conflict.reason_code());
                }
            }
        }
        Err(first_rejection.unwrap_or(ReasonCode::CapacityExhausted))
    }

    fn assign(&mut self, q: QueuedPreference<'a>, task_id: TaskId) {
        let pref = q.preference;
        let via_substitute = pref.is_substitute;

        self.held
            .entry(pref.helper_id.clone())
            .or_default()
            .push(NewAssignment {
                helper_id: pref.helper_id.clone(),
                task_id: task_id.clone(),
                via_substitute,
            });
        *self.filled.entry(task_id.clone()).or_default() += 1;
        self.proposed.push(ProposedAssignment {
            preference_id: pref.id.clone(),
            helper_id: pref.helper_id.clone(),
            task_id,
            via_substitute,
        });

        self.served.insert(pref.helper_id.clone());
        self.satisfied.insert(q.seq);
        self.last_reason.remove(&q.seq);
        if via_substitute {
            self.substitute_assigned += 1;
        } else {
            self.regular_assigned += 1;
        }
    }
}

/// What a finished run wants to write, plus its report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Allocation {
    pub proposed: Vec<ProposedAssignment>,
    pub regular_assigned: usize,
    pub substitute_assigned: usize,
    pub unassignable: Vec<Unassignable>,
}

impl Allocation {
    pub fn new_assignments(&self) -> Vec<NewAssignment> {
        self.proposed.iter().map(NewAssignment::from).collect()
    }

    pub fn into_result(self) -> BatchResult {
        BatchResult {
            success: true,
            total_assigned: self.regular_assigned + self.substitute_assigned,
            regular_assigned_count: self.regular_assigned,
            substitute_assigned_count: self.substitute_assigned,
            unassignable: self.unassignable,
            error: None,
        }
    }

    /// Final transition once the store has answered
    pub fn settle<E: fmt::Display>(self, commit: Result<(), E>) -> (Phase, BatchResult) {
        match commit {
            Ok(()) => (Phase::Committed, self.into_result()),
            Err(err) => (Phase::Failed, BatchResult::failed(err.to_string())),
        }
    }
}

/// Runs all passes over `snapshot`
pub fn allocate(snapshot: &Snapshot) -> Allocation {
    AllocationRun::new(snapshot).finish()
}
