use std::sync::atomic::{AtomicU64, Ordering};

use actix_web::{middleware, web, App, HttpRequest, HttpResponse, HttpServer, Result};
use chrono::Utc;
use serde::Deserialize;

use crate::error::{AssignError, ImportError, SlotError, SlotOpError, StoreError};
use crate::form::{assignments_to_csv, PreferenceSubmission};
use crate::parser::{load_preferences, load_tasks};
use crate::schedule::types::{AssignmentId, Preference, SlotId};
use crate::service::AssignmentService;

pub struct AppState {
    pub service: AssignmentService,
    pub admin_password: String,
    submissions: AtomicU64,
}

impl AppState {
    pub fn new(service: AssignmentService, admin_password: String) -> Self {
        Self {
            service,
            admin_password,
            submissions: AtomicU64::new(0),
        }
    }

    /// Id for a submission that arrived without one
    fn next_preference_id(&self) -> String {
        let n = self.submissions.fetch_add(1, Ordering::Relaxed);
        format!("web-{}-{}", Utc::now().timestamp_micros(), n)
    }
}

#[derive(Deserialize)]
pub struct LoginRequest {
    password: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAssignmentRequest {
    helper_id: String,
    task_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSlotRequest {
    task_id: String,
    time: String,
    capacity: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceRequest {
    assignment_id: AssignmentId,
}

fn is_admin(req: &HttpRequest, state: &AppState) -> bool {
    let password = req
        .headers()
        .get("X-Admin-Password")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    password == state.admin_password
}

fn unauthorized() -> HttpResponse {
    HttpResponse::Unauthorized().json(serde_json::json!({"success": false, "error": "Unauthorized"}))
}

fn server_error(err: impl std::fmt::Display) -> HttpResponse {
    log::error!("request failed: {}", err);
    HttpResponse::InternalServerError().json(serde_json::json!({"success": false, "error": err.to_string()}))
}

fn bad_request(err: impl std::fmt::Display) -> HttpResponse {
    HttpResponse::BadRequest().json(serde_json::json!({"success": false, "error": err.to_string()}))
}

fn import_error(err: ImportError) -> HttpResponse {
    match err {
        ImportError::Store(err) => server_error(err),
        other => bad_request(other),
    }
}

fn assign_error(err: AssignError) -> HttpResponse {
    let message = err.to_string();
    match err {
        AssignError::Conflict(conflict) => HttpResponse::Conflict().json(serde_json::json!({
            "success": false,
            "reasonCode": conflict.reason_code(),
            "error": message,
        })),
        AssignError::InvalidTimeWindow(_) => HttpResponse::UnprocessableEntity().json(serde_json::json!({
            "success": false,
            "reasonCode": "InvalidTimeWindow",
            "error": message,
        })),
        AssignError::UnknownTask(_) | AssignError::NotFound(_) => {
            HttpResponse::NotFound().json(serde_json::json!({"success": false, "error": message}))
        }
        AssignError::Store(err) => server_error(err),
    }
}

fn slot_error(err: SlotOpError) -> HttpResponse {
    let message = err.to_string();
    match err {
        SlotOpError::Rule(rule) => HttpResponse::Conflict().json(serde_json::json!({
            "success": false,
            "code": rule.code(),
            "error": message,
        })),
        SlotOpError::InvalidTimeWindow(_) => bad_request(message),
        SlotOpError::AssignmentNotFound(_) | SlotOpError::SlotNotFound(_) | SlotOpError::UnknownTask(_) => {
            HttpResponse::NotFound().json(serde_json::json!({"success": false, "error": message}))
        }
        SlotOpError::Store(err) => server_error(err),
    }
}

// Admin login endpoint
async fn admin_login(req: web::Json<LoginRequest>, state: web::Data<AppState>) -> Result<HttpResponse> {
    if req.password == state.admin_password {
        Ok(HttpResponse::Ok().json(serde_json::json!({"success": true})))
    } else {
        Ok(HttpResponse::Unauthorized().json(serde_json::json!({"success": false, "error": "Invalid password"})))
    }
}

// Replaces the task catalog with an uploaded CSV
async fn upload_tasks(req: HttpRequest, body: web::Bytes, state: web::Data<AppState>) -> Result<HttpResponse> {
    if !is_admin(&req, &state) {
        return Ok(unauthorized());
    }
    let tasks = match load_tasks(&body[..]) {
        Ok(tasks) => tasks,
        Err(e) => return Ok(import_error(e)),
    };
    match state.service.import_tasks(tasks).await {
        Ok(count) => Ok(HttpResponse::Ok().json(serde_json::json!({"success": true, "imported": count}))),
        Err(e) => Ok(import_error(e)),
    }
}

async fn upload_preferences(req: HttpRequest, body: web::Bytes, state: web::Data<AppState>) -> Result<HttpResponse> {
    if !is_admin(&req, &state) {
        return Ok(unauthorized());
    }
    let preferences = match load_preferences(&body[..]) {
        Ok(preferences) => preferences,
        Err(e) => return Ok(import_error(e)),
    };
    match state.service.import_preferences(preferences).await {
        Ok(count) => Ok(HttpResponse::Ok().json(serde_json::json!({"success": true, "imported": count}))),
        Err(e) => Ok(import_error(e)),
    }
}

// Helper form submission, open to everyone
async fn submit_preference(
    submission: web::Json<PreferenceSubmission>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let mut submission = submission.into_inner();
    if submission.id.as_deref().map_or(true, |id| id.trim().is_empty()) {
        submission.id = Some(state.next_preference_id());
    }
    let preference = match Preference::try_from(submission) {
        Ok(preference) => preference,
        Err(e) => return Ok(bad_request(e)),
    };
    match state.service.submit_preference(preference.clone()).await {
        Ok(()) => Ok(HttpResponse::Created().json(preference)),
        // already submitted
        Err(e @ StoreError::Corrupt(_)) => {
            Ok(HttpResponse::Conflict().json(serde_json::json!({"success": false, "error": e.to_string()})))
        }
        Err(e) => Ok(server_error(e)),
    }
}

async fn run_assignment(req: HttpRequest, state: web::Data<AppState>) -> Result<HttpResponse> {
    if !is_admin(&req, &state) {
        return Ok(unauthorized());
    }
    let result = state.service.run_batch().await;
    if result.success {
        Ok(HttpResponse::Ok().json(result))
    } else {
        Ok(HttpResponse::InternalServerError().json(result))
    }
}

// Dry run: what the next batch would do, nothing stored
async fn preview_assignment(req: HttpRequest, state: web::Data<AppState>) -> Result<HttpResponse> {
    if !is_admin(&req, &state) {
        return Ok(unauthorized());
    }
    match state.service.preview_batch().await {
        Ok(allocation) => {
            let proposed = allocation.proposed.clone();
            Ok(HttpResponse::Ok().json(serde_json::json!({
                "proposed": proposed,
                "result": allocation.into_result(),
            })))
        }
        Err(e) => Ok(server_error(e)),
    }
}

async fn list_assignments(req: HttpRequest, state: web::Data<AppState>) -> Result<HttpResponse> {
    if !is_admin(&req, &state) {
        return Ok(unauthorized());
    }
    match state.service.list_assignments().await {
        Ok(assignments) => Ok(HttpResponse::Ok().json(assignments)),
        Err(e) => Ok(server_error(e)),
    }
}

async fn export_assignments(req: HttpRequest, state: web::Data<AppState>) -> Result<HttpResponse> {
    if !is_admin(&req, &state) {
        return Ok(unauthorized());
    }
    let assignments = match state.service.list_assignments().await {
        Ok(assignments) => assignments,
        Err(e) => return Ok(server_error(e)),
    };
    match assignments_to_csv(&assignments) {
        Ok(csv) => Ok(HttpResponse::Ok()
            .content_type("text/csv; charset=utf-8")
            .insert_header(("Content-Disposition", "attachment; filename=\"assignments.csv\""))
            .body(csv)),
        Err(e) => Ok(server_error(e)),
    }
}

async fn create_assignment(
    req: HttpRequest,
    body: web::Json<CreateAssignmentRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    if !is_admin(&req, &state) {
        return Ok(unauthorized());
    }
    match state.service.create_assignment(&body.helper_id, &body.task_id).await {
        Ok(assignment) => Ok(HttpResponse::Created().json(assignment)),
        Err(e) => Ok(assign_error(e)),
    }
}

async fn delete_assignment(
    req: HttpRequest,
    id: web::Path<AssignmentId>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    if !is_admin(&req, &state) {
        return Ok(unauthorized());
    }
    match state.service.delete_assignment(id.into_inner()).await {
        Ok(()) => Ok(HttpResponse::NoContent().finish()),
        Err(e) => Ok(assign_error(e)),
    }
}

async fn create_slot(
    req: HttpRequest,
    body: web::Json<CreateSlotRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    if !is_admin(&req, &state) {
        return Ok(unauthorized());
    }
    match state.service.create_slot(&body.task_id, &body.time, body.capacity).await {
        Ok(slot) => Ok(HttpResponse::Created().json(slot)),
        Err(e) => Ok(slot_error(e)),
    }
}

async fn task_slots(req: HttpRequest, task_id: web::Path<String>, state: web::Data<AppState>) -> Result<HttpResponse> {
    if !is_admin(&req, &state) {
        return Ok(unauthorized());
    }
    match state.service.slots_for_task(task_id.as_str()).await {
        Ok(slots) => Ok(HttpResponse::Ok().json(slots)),
        Err(e) => Ok(server_error(e)),
    }
}

async fn place_in_slot(
    req: HttpRequest,
    slot_id: web::Path<SlotId>,
    body: web::Json<PlaceRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    if !is_admin(&req, &state) {
        return Ok(unauthorized());
    }
    match state.service.place_in_slot(body.assignment_id, slot_id.into_inner()).await {
        Ok(placement) => Ok(HttpResponse::Created().json(placement)),
        Err(e) => Ok(slot_error(e)),
    }
}

async fn remove_from_slot(
    req: HttpRequest,
    path: web::Path<(SlotId, AssignmentId)>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    if !is_admin(&req, &state) {
        return Ok(unauthorized());
    }
    let (slot_id, assignment_id) = path.into_inner();
    match state.service.remove_from_slot(assignment_id, slot_id).await {
        Ok(()) => Ok(HttpResponse::NoContent().finish()),
        Err(SlotOpError::Rule(SlotError::NotPlaced)) => Ok(HttpResponse::NotFound().json(serde_json::json!({
            "success": false,
            "code": SlotError::NotPlaced.code(),
            "error": SlotError::NotPlaced.to_string(),
        }))),
        Err(e) => Ok(slot_error(e)),
    }
}

/// Routes of the JSON API, shared by the server and the tests
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/api/login", web::post().to(admin_login))
        .route("/api/upload/tasks", web::post().to(upload_tasks))
        .route("/api/upload/preferences", web::post().to(upload_preferences))
        .route("/api/preferences", web::post().to(submit_preference))
        .route("/api/assign/run", web::post().to(run_assignment))
        .route("/api/assign/preview", web::get().to(preview_assignment))
        .route("/api/assignments", web::get().to(list_assignments))
        .route("/api/assignments", web::post().to(create_assignment))
        .route("/api/assignments/export", web::get().to(export_assignments))
        .route("/api/assignments/{id}", web::delete().to(delete_assignment))
        .route("/api/slots", web::post().to(create_slot))
        .route("/api/tasks/{task_id}/slots", web::get().to(task_slots))
        .route("/api/slots/{slot_id}/assignments", web::post().to(place_in_slot))
        .route(
            "/api/slots/{slot_id}/assignments/{assignment_id}",
            web::delete().to(remove_from_slot),
        );
}

pub async fn start_server(port: u16, state: AppState) -> std::io::Result<()> {
    let app_state = web::Data::new(state);

    HttpServer::new(move || {
        App::new()
            .app_data(app_state.clone())
            .wrap(middleware::Logger::default())
            .configure(configure)
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}
