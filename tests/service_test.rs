use std::sync::Arc;

use async_trait::async_trait;

use festival_helpers::error::{AssignError, Conflict, SlotError, SlotOpError, StoreError, StoreResult};
use festival_helpers::schedule::types::{
    Assignment, AssignmentId, NewAssignment, Preference, SlotAssignment, TaskRecord,
};
use festival_helpers::schedule::ReasonCode;
use festival_helpers::service::AssignmentService;
use festival_helpers::store::{AssignmentGuard, AssignmentStore, MemoryStore, SlotStore};

fn task(id: &str, time: &str, capacity: u32) -> TaskRecord {
    TaskRecord {
        id: id.to_string(),
        title: id.to_uppercase(),
        time: time.to_string(),
        capacity,
    }
}

fn wants(id: &str, helper: &str, task: &str, priority: u32) -> Preference {
    Preference {
        id: id.to_string(),
        helper_id: helper.to_string(),
        task_id: Some(task.to_string()),
        priority: Some(priority),
        is_substitute: false,
        desired_window: None,
        free_text: None,
    }
}

fn festival() -> Vec<TaskRecord> {
    vec![
        task("bar", "18:00-22:00", 2),
        task("kasse", "17:00-19:00", 1),
        task("aufbau", "vormittags", 3),
        task("kaputt", "irgendwann", 1),
    ]
}

fn service_with(tasks: Vec<TaskRecord>, prefs: Vec<Preference>) -> (Arc<MemoryStore>, AssignmentService) {
    let store = Arc::new(MemoryStore::with_data(tasks, prefs, Vec::new()).unwrap());
    (store.clone(), AssignmentService::from_store(store))
}

#[tokio::test]
async fn duplicate_is_rejected_and_never_stored() {
    let (_, service) = service_with(festival(), Vec::new());

    service.create_assignment("anna", "bar").await.unwrap();
    for _ in 0..3 {
        let err = service.create_assignment("anna", "bar").await.unwrap_err();
        assert!(matches!(err, AssignError::Conflict(Conflict::DuplicateAssignment)));
    }
    assert_eq!(service.list_assignments().await.unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_duplicates_create_one_row() {
    let (_, service) = service_with(festival(), Vec::new());

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let service = service.clone();
            tokio::spawn(async move { service.create_assignment("anna", "bar").await })
        })
        .collect();

    let mut created = 0;
    let mut duplicates = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => created += 1,
            Err(AssignError::Conflict(Conflict::DuplicateAssignment)) => duplicates += 1,
            Err(other) => panic!("unexpected error {}", other),
        }
    }
    assert_eq!(created, 1);
    assert_eq!(duplicates, 7);
    assert_eq!(service.list_assignments().await.unwrap().len(), 1);
}

#[tokio::test]
async fn manual_path_checks_time_but_not_capacity() {
    let (_, service) = service_with(festival(), Vec::new());

    service.create_assignment("anna", "bar").await.unwrap();
    let err = service.create_assignment("anna", "kasse").await.unwrap_err();
    match err {
        AssignError::Conflict(Conflict::TimeConflict { with, .. }) => assert_eq!(with, "bar"),
        other => panic!("expected time conflict, got {}", other),
    }

    // kasse has one seat; an admin may overbook on purpose
    service.create_assignment("ben", "kasse").await.unwrap();
    service.create_assignment("carla", "kasse").await.unwrap();

    // touching windows are fine
    service.create_assignment("anna", "aufbau").await.unwrap();
}

#[tokio::test]
async fn manual_path_reports_bad_tasks() {
    let (_, service) = service_with(festival(), Vec::new());

    assert!(matches!(
        service.create_assignment("anna", "ghost").await,
        Err(AssignError::UnknownTask(id)) if id == "ghost"
    ));
    assert!(matches!(
        service.create_assignment("anna", "kaputt").await,
        Err(AssignError::InvalidTimeWindow(_))
    ));
}

#[tokio::test]
async fn held_task_with_unreadable_window_blocks_manual_assignment() {
    let store = Arc::new(MemoryStore::with_data(festival(), Vec::new(), vec![stored(7, "anna", "kaputt")]).unwrap());
    let service = AssignmentService::from_store(store);

    match service.create_assignment("anna", "bar").await {
        Err(AssignError::InvalidTimeWindow(err)) => assert_eq!(err.input, "irgendwann"),
        other => panic!("expected invalid time window, got {:?}", other),
    }
    // a helper without the broken task is not affected
    service.create_assignment("ben", "bar").await.unwrap();
    assert_eq!(service.list_assignments().await.unwrap().len(), 2);
}

#[tokio::test]
async fn delete_assignment_once() {
    let (_, service) = service_with(festival(), Vec::new());
    let assignment = service.create_assignment("anna", "bar").await.unwrap();

    service.delete_assignment(assignment.id).await.unwrap();
    assert!(matches!(
        service.delete_assignment(assignment.id).await,
        Err(AssignError::NotFound(id)) if id == assignment.id
    ));
    // the pair can be created again afterwards
    service.create_assignment("anna", "bar").await.unwrap();
}

#[tokio::test]
async fn batch_run_commits_and_reports() {
    let prefs = vec![
        wants("p1", "anna", "bar", 1),
        wants("p2", "ben", "bar", 1),
        wants("p3", "carla", "bar", 2),
        wants("p4", "anna", "kasse", 2),
        wants("p5", "dora", "kaputt", 1),
    ];
    let (_, service) = service_with(festival(), prefs);

    let result = service.run_batch().await;
    assert!(result.success);
    assert_eq!(result.total_assigned, 2);
    let reasons: Vec<(&str, ReasonCode)> = result
        .unassignable
        .iter()
        .map(|u| (u.id.as_str(), u.reason_code))
        .collect();
    assert_eq!(
        reasons,
        vec![
            ("p5", ReasonCode::InvalidTimeWindow),
            ("p3", ReasonCode::CapacityExhausted),
            ("p4", ReasonCode::TimeConflict),
        ]
    );
    assert_eq!(service.list_assignments().await.unwrap().len(), 2);

    // nothing new on a second run
    let again = service.run_batch().await;
    assert!(again.success);
    assert_eq!(again.total_assigned, 0);
    assert_eq!(service.list_assignments().await.unwrap().len(), 2);
}

/// Delegates to a MemoryStore but refuses every batch commit
struct RefusingCommits(Arc<MemoryStore>);

#[async_trait]
impl AssignmentStore for RefusingCommits {
    async fn list_assignments(&self) -> StoreResult<Vec<Assignment>> {
        self.0.list_assignments().await
    }

    async fn get_assignment(&self, id: AssignmentId) -> StoreResult<Option<Assignment>> {
        self.0.get_assignment(id).await
    }

    async fn commit_batch(&self, _batch: &[NewAssignment]) -> StoreResult<Vec<Assignment>> {
        Err(StoreError::Unavailable("connection reset".to_string()))
    }

    async fn insert_checked(
        &self,
        new: NewAssignment,
        guard: AssignmentGuard<'_>,
    ) -> StoreResult<Result<Assignment, Conflict>> {
        self.0.insert_checked(new, guard).await
    }

    async fn delete_assignment(&self, id: AssignmentId) -> StoreResult<bool> {
        self.0.delete_assignment(id).await
    }
}

#[tokio::test]
async fn failed_commit_stores_nothing() {
    let store = Arc::new(MemoryStore::with_data(
        festival(),
        vec![wants("p1", "anna", "bar", 1), wants("p2", "ben", "kasse", 1)],
        Vec::new(),
    )
    .unwrap());
    let service = AssignmentService::new(
        store.clone(),
        store.clone(),
        Arc::new(RefusingCommits(store.clone())),
        store.clone(),
    );

    let result = service.run_batch().await;
    assert!(!result.success);
    assert_eq!(result.total_assigned, 0);
    assert!(result.error.unwrap().contains("connection reset"));
    assert!(store.list_assignments().await.unwrap().is_empty());
}

fn stored(id: AssignmentId, helper: &str, task: &str) -> Assignment {
    Assignment {
        id,
        helper_id: helper.to_string(),
        task_id: task.to_string(),
        via_substitute: false,
        created_at: chrono::Utc::now(),
    }
}

#[test]
fn seeding_rejects_duplicates() {
    let seeded = MemoryStore::with_data(
        festival(),
        Vec::new(),
        vec![stored(1, "anna", "bar"), stored(2, "ben", "bar"), stored(3, "anna", "bar")],
    );
    match seeded {
        Err(StoreError::Duplicate { helper_id, task_id }) => {
            assert_eq!(helper_id, "anna");
            assert_eq!(task_id, "bar");
        }
        Err(other) => panic!("expected duplicate, got {}", other),
        Ok(_) => panic!("duplicate pair was accepted"),
    }

    let seeded = MemoryStore::with_data(
        festival(),
        vec![wants("p1", "anna", "bar", 1), wants("p1", "ben", "kasse", 1)],
        Vec::new(),
    );
    assert!(matches!(seeded, Err(StoreError::Corrupt(_))));
}

#[tokio::test]
async fn batch_with_duplicate_is_rolled_back() {
    let store = MemoryStore::with_data(festival(), Vec::new(), Vec::new()).unwrap();
    let batch = vec![
        NewAssignment {
            helper_id: "anna".to_string(),
            task_id: "bar".to_string(),
            via_substitute: false,
        },
        NewAssignment {
            helper_id: "anna".to_string(),
            task_id: "bar".to_string(),
            via_substitute: true,
        },
    ];

    assert!(matches!(
        store.commit_batch(&batch).await,
        Err(StoreError::Duplicate { .. })
    ));
    assert!(store.list_assignments().await.unwrap().is_empty());
}

#[tokio::test]
async fn slot_lifecycle() {
    let (_, service) = service_with(festival(), Vec::new());
    let anna = service.create_assignment("anna", "bar").await.unwrap();
    let ben = service.create_assignment("ben", "bar").await.unwrap();
    let carla = service.create_assignment("carla", "kasse").await.unwrap();

    let early = service.create_slot("bar", "18:00-20:00", 1).await.unwrap();
    let late = service.create_slot("bar", "20:00-22:00", 2).await.unwrap();
    assert_eq!(service.slots_for_task("bar").await.unwrap(), vec![early.clone(), late.clone()]);

    service.place_in_slot(anna.id, early.id).await.unwrap();
    assert!(matches!(
        service.place_in_slot(ben.id, early.id).await,
        Err(SlotOpError::Rule(SlotError::SlotFull))
    ));
    assert!(matches!(
        service.place_in_slot(anna.id, late.id).await,
        Err(SlotOpError::Rule(SlotError::AlreadyPlaced))
    ));
    assert!(matches!(
        service.place_in_slot(carla.id, late.id).await,
        Err(SlotOpError::Rule(SlotError::WrongTask))
    ));
    service.place_in_slot(ben.id, late.id).await.unwrap();

    assert!(matches!(
        service.remove_from_slot(ben.id, early.id).await,
        Err(SlotOpError::Rule(SlotError::NotPlaced))
    ));
    service.remove_from_slot(anna.id, early.id).await.unwrap();
    service.place_in_slot(anna.id, late.id).await.unwrap();
}

#[tokio::test]
async fn slot_errors_for_missing_things() {
    let (_, service) = service_with(festival(), Vec::new());
    let anna = service.create_assignment("anna", "bar").await.unwrap();

    assert!(matches!(
        service.create_slot("ghost", "18:00-19:00", 1).await,
        Err(SlotOpError::UnknownTask(_))
    ));
    assert!(matches!(
        service.create_slot("bar", "abends", 1).await,
        Err(SlotOpError::InvalidTimeWindow(_))
    ));
    assert!(matches!(
        service.place_in_slot(anna.id, 99).await,
        Err(SlotOpError::SlotNotFound(99))
    ));
    let slot = service.create_slot("bar", "18:00-19:00", 1).await.unwrap();
    assert!(matches!(
        service.place_in_slot(4242, slot.id).await,
        Err(SlotOpError::AssignmentNotFound(4242))
    ));
}

#[tokio::test]
async fn deleting_an_assignment_frees_its_slot() {
    let (_, service) = service_with(festival(), Vec::new());
    let anna = service.create_assignment("anna", "bar").await.unwrap();
    let ben = service.create_assignment("ben", "bar").await.unwrap();
    let slot = service.create_slot("bar", "18:00-20:00", 1).await.unwrap();

    service.place_in_slot(anna.id, slot.id).await.unwrap();
    service.delete_assignment(anna.id).await.unwrap();
    service.place_in_slot(ben.id, slot.id).await.unwrap();
}

#[tokio::test]
async fn imports_replace_and_validate() {
    let (_, service) = service_with(Vec::new(), Vec::new());
    assert_eq!(service.import_tasks(festival()).await.unwrap(), 4);
    assert!(service
        .import_preferences(vec![wants("p1", "anna", "bar", 1), wants("p1", "ben", "bar", 1)])
        .await
        .is_err());
    assert_eq!(
        service
            .import_preferences(vec![wants("p1", "anna", "bar", 1)])
            .await
            .unwrap(),
        1
    );
    service
        .submit_preference(wants("p2", "ben", "bar", 2))
        .await
        .unwrap();
    assert!(service.submit_preference(wants("p2", "ben", "bar", 2)).await.is_err());

    let snapshot = service.snapshot().await.unwrap();
    assert_eq!(snapshot.tasks.len(), 3);
    assert!(snapshot.invalid_tasks.contains_key("kaputt"));
    assert_eq!(snapshot.preferences.len(), 2);
}

#[tokio::test]
async fn placement_of_a_deleted_assignment_is_refused() {
    let (store, service) = service_with(festival(), Vec::new());
    let anna = service.create_assignment("anna", "bar").await.unwrap();
    let slot = service.create_slot("bar", "18:00-20:00", 1).await.unwrap();
    service.delete_assignment(anna.id).await.unwrap();

    // a caller that looked the assignment up before it was deleted
    let allow = |_: &[SlotAssignment]| -> Result<(), SlotError> { Ok(()) };
    let placement = SlotAssignment {
        slot_id: slot.id,
        assignment_id: anna.id,
    };
    assert!(matches!(
        store.place_checked(placement, "bar", &allow).await,
        Err(StoreError::AssignmentGone(id)) if id == anna.id
    ));
    assert!(store.placements_for_task("bar").await.unwrap().is_empty());
    assert!(matches!(
        service.place_in_slot(anna.id, slot.id).await,
        Err(SlotOpError::AssignmentNotFound(id)) if id == anna.id
    ));

    // the seat is still free
    let ben = service.create_assignment("ben", "bar").await.unwrap();
    service.place_in_slot(ben.id, slot.id).await.unwrap();
}
