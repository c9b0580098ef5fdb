use std::io;
use std::path::Path;

use chrono::{DateTime, Utc};
use csv::{Reader, StringRecord};

use crate::error::ImportError;
use crate::schedule::types::{Assignment, Preference, TaskRecord};

const TASK_ID: &[&str] = &["id", "task_id", "aufgabe_id"];
const TASK_TITLE: &[&str] = &["title", "titel", "name"];
const TASK_TIME: &[&str] = &["time", "zeitfenster", "window"];
const TASK_CAPACITY: &[&str] = &["capacity", "bedarf", "needed"];

const PREF_ID: &[&str] = &["id", "preference_id", "rückmeldung_id"];
const PREF_HELPER: &[&str] = &["helper", "helper_id", "helfer", "helfer_id"];
const PREF_TASK: &[&str] = &["task", "task_id", "aufgabe", "aufgabe_id"];
const PREF_PRIORITY: &[&str] = &["priority", "priorität", "prioritaet"];
const PREF_SUBSTITUTE: &[&str] = &["substitute", "is_substitute", "springer"];
const PREF_WINDOW: &[&str] = &["window", "desired_window", "zeitfenster", "wunschzeit"];
const PREF_NOTE: &[&str] = &["note", "free_text", "kommentar", "freitext"];

const ASSIGN_ID: &[&str] = &["id", "assignment_id"];
const ASSIGN_HELPER: &[&str] = &["helper", "helper_id", "helfer"];
const ASSIGN_TASK: &[&str] = &["task", "task_id", "aufgabe"];
const ASSIGN_SUBSTITUTE: &[&str] = &["via_substitute", "substitute", "springer"];
const ASSIGN_CREATED: &[&str] = &["created_at", "erstellt"];

fn normalize(header: &str) -> String {
    header.trim().to_lowercase().replace([' ', '-'], "_")
}

/// Finds the first column whose normalized header is one of `names`
fn column(headers: &StringRecord, names: &[&str]) -> Option<usize> {
    headers.iter().position(|h| names.contains(&normalize(h).as_str()))
}

fn required(headers: &StringRecord, names: &[&'static str]) -> Result<usize, ImportError> {
    column(headers, names).ok_or(ImportError::MissingColumn(names[0]))
}

fn field<'r>(record: &'r StringRecord, col: Option<usize>) -> &'r str {
    col.and_then(|c| record.get(c)).unwrap_or("").trim()
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Parses a boolean value from various string representations
fn parse_bool(value: &str) -> bool {
    let lower = value.trim().to_lowercase();
    matches!(lower.as_str(), "yes" | "true" | "1" | "ja" | "x")
}

fn parse_u32(value: &str, row: usize, column: &'static str) -> Result<u32, ImportError> {
    value.parse().map_err(|_| ImportError::InvalidField {
        row,
        column,
        value: value.to_string(),
    })
}

/// Loads the task catalog. Time windows are kept as written and parsed
/// when a snapshot is taken.
pub fn load_tasks<R: io::Read>(input: R) -> Result<Vec<TaskRecord>, ImportError> {
    let mut reader = Reader::from_reader(input);
    let headers = reader.headers()?.clone();

    let id_col = required(&headers, TASK_ID)?;
    let title_col = column(&headers, TASK_TITLE);
    let time_col = required(&headers, TASK_TIME)?;
    let capacity_col = required(&headers, TASK_CAPACITY)?;

    let mut tasks = Vec::new();
    for (index, result) in reader.records().enumerate() {
        let record = result?;
        // header is line 1
        let row = index + 2;

        let id = field(&record, Some(id_col));
        if id.is_empty() {
            log::warn!("tasks row {}: no id, skipped", row);
            continue;
        }
        let capacity = parse_u32(field(&record, Some(capacity_col)), row, "capacity")?;

        tasks.push(TaskRecord {
            id: id.to_string(),
            title: field(&record, title_col).to_string(),
            time: field(&record, Some(time_col)).to_string(),
            capacity,
        });
    }

    log::debug!("loaded {} tasks", tasks.len());
    Ok(tasks)
}

/// Loads preferences in file order, which is their submission order
pub fn load_preferences<R: io::Read>(input: R) -> Result<Vec<Preference>, ImportError> {
    let mut reader = Reader::from_reader(input);
    let headers = reader.headers()?.clone();

    let id_col = required(&headers, PREF_ID)?;
    let helper_col = required(&headers, PREF_HELPER)?;
    let task_col = column(&headers, PREF_TASK);
    let priority_col = column(&headers, PREF_PRIORITY);
    let substitute_col = column(&headers, PREF_SUBSTITUTE);
    let window_col = column(&headers, PREF_WINDOW);
    let note_col = column(&headers, PREF_NOTE);

    let mut preferences = Vec::new();
    for (index, result) in reader.records().enumerate() {
        let record = result?;
        let row = index + 2;

        let id = field(&record, Some(id_col));
        let helper_id = field(&record, Some(helper_col));
        // Skip if essential fields are missing
        if id.is_empty() || helper_id.is_empty() {
            log::warn!("preferences row {}: id or helper missing, skipped", row);
            continue;
        }

        let priority = match field(&record, priority_col) {
            "" => None,
            raw => Some(parse_u32(raw, row, "priority")?),
        };

        preferences.push(Preference {
            id: id.to_string(),
            helper_id: helper_id.to_string(),
            task_id: non_empty(field(&record, task_col)),
            priority,
            is_substitute: parse_bool(field(&record, substitute_col)),
            desired_window: non_empty(field(&record, window_col)),
            free_text: non_empty(field(&record, note_col)),
        });
    }

    log::debug!("loaded {} preferences", preferences.len());
    Ok(preferences)
}

/// Loads assignments written by a previous run
pub fn load_assignments<R: io::Read>(input: R) -> Result<Vec<Assignment>, ImportError> {
    let mut reader = Reader::from_reader(input);
    let headers = reader.headers()?.clone();

    let id_col = required(&headers, ASSIGN_ID)?;
    let helper_col = required(&headers, ASSIGN_HELPER)?;
    let task_col = required(&headers, ASSIGN_TASK)?;
    let substitute_col = column(&headers, ASSIGN_SUBSTITUTE);
    let created_col = column(&headers, ASSIGN_CREATED);

    let mut assignments = Vec::new();
    for (index, result) in reader.records().enumerate() {
        let record = result?;
        let row = index + 2;

        let raw_id = field(&record, Some(id_col));
        let id = raw_id.parse().map_err(|_| ImportError::InvalidField {
            row,
            column: "id",
            value: raw_id.to_string(),
        })?;
        let helper_id = field(&record, Some(helper_col));
        let task_id = field(&record, Some(task_col));
        if helper_id.is_empty() || task_id.is_empty() {
            log::warn!("assignments row {}: helper or task missing, skipped", row);
            continue;
        }

        let created_at = match field(&record, created_col) {
            "" => Utc::now(),
            raw => DateTime::parse_from_rfc3339(raw)
                .map_err(|_| ImportError::InvalidField {
                    row,
                    column: "created_at",
                    value: raw.to_string(),
                })?
                .with_timezone(&Utc),
        };

        assignments.push(Assignment {
            id,
            helper_id: helper_id.to_string(),
            task_id: task_id.to_string(),
            via_substitute: parse_bool(field(&record, substitute_col)),
            created_at,
        });
    }

    Ok(assignments)
}

pub fn load_tasks_from_path<P: AsRef<Path>>(path: P) -> Result<Vec<TaskRecord>, ImportError> {
    load_tasks(std::fs::File::open(path)?)
}

pub fn load_preferences_from_path<P: AsRef<Path>>(path: P) -> Result<Vec<Preference>, ImportError> {
    load_preferences(std::fs::File::open(path)?)
}

pub fn load_assignments_from_path<P: AsRef<Path>>(path: P) -> Result<Vec<Assignment>, ImportError> {
    load_assignments(std::fs::File::open(path)?)
}
