use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::schedule::types::{Assignment, BatchResult, Snapshot, Unassignable};

/// Formats a task as "Title (id)", falling back to the bare id
pub fn format_task(snapshot: &Snapshot, task_id: &str) -> String {
    match snapshot.task(task_id) {
        Some(task) if !task.title.is_empty() => format!("{} ({})", task.title, task_id),
        _ => task_id.to_string(),
    }
}

/// One line per unassignable preference, with the names the result leaves out
pub fn describe_unassignable(snapshot: &Snapshot, entry: &Unassignable) -> String {
    let Some(pref) = snapshot.preferences.iter().find(|p| p.id == entry.id) else {
        return format!("{}: {}", entry.id, entry.reason_code.as_str());
    };
    let target = match &pref.task_id {
        Some(task_id) => format_task(snapshot, task_id),
        None => "any task".to_string(),
    };
    let kind = if pref.is_substitute { " [substitute]" } else { "" };
    format!(
        "{} -> {}{} (preference {}): {}",
        pref.helper_id,
        target,
        kind,
        pref.id,
        entry.reason_code.as_str()
    )
}

/// Assignments grouped by task, tasks in title order
fn roster<'a>(snapshot: &Snapshot, assignments: &'a [Assignment]) -> BTreeMap<String, Vec<&'a Assignment>> {
    let mut by_task: BTreeMap<String, Vec<&Assignment>> = BTreeMap::new();
    for a in assignments {
        by_task.entry(format_task(snapshot, &a.task_id)).or_default().push(a);
    }
    by_task
}

fn write_report<W: Write>(
    out: &mut W,
    result: &BatchResult,
    snapshot: &Snapshot,
    assignments: &[Assignment],
) -> std::io::Result<()> {
    writeln!(out, "** Assignment run **")?;
    if !result.success {
        writeln!(out, "FAILED: {}", result.error.as_deref().unwrap_or("unknown error"))?;
        writeln!(out, "Nothing was stored.")?;
        return Ok(());
    }

    writeln!(
        out,
        "Assigned {} ({} regular, {} substitute)",
        result.total_assigned, result.regular_assigned_count, result.substitute_assigned_count
    )?;

    if !result.unassignable.is_empty() {
        writeln!(out, "\nUnassignable ({}):", result.unassignable.len())?;
        for entry in &result.unassignable {
            writeln!(out, "  - {}", describe_unassignable(snapshot, entry))?;
        }
    }

    writeln!(out, "\nRoster:")?;
    for (task, helpers) in roster(snapshot, assignments) {
        let capacity = helpers
            .first()
            .and_then(|a| snapshot.task(&a.task_id))
            .map(|t| t.capacity.to_string())
            .unwrap_or_else(|| "?".to_string());
        writeln!(out, "  {} [{}/{}]", task, helpers.len(), capacity)?;
        for a in helpers {
            let marker = if a.via_substitute { " (substitute)" } else { "" };
            writeln!(out, "    {}{}", a.helper_id, marker)?;
        }
    }
    Ok(())
}

/// Prints a batch report in a readable format
pub fn print_batch_report(
    result: &BatchResult,
    snapshot: &Snapshot,
    assignments: &[Assignment],
) -> std::io::Result<()> {
    write_report(&mut std::io::stdout().lock(), result, snapshot, assignments)
}

pub fn write_report_to_file<P: AsRef<Path>>(
    result: &BatchResult,
    snapshot: &Snapshot,
    assignments: &[Assignment],
    filename: P,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut file = File::create(filename)?;
    write_report(&mut file, result, snapshot, assignments)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::types::{Preference, ReasonCode, TaskRecord};
    use chrono::Utc;

    fn snapshot() -> Snapshot {
        let tasks = vec![TaskRecord {
            id: "t1".to_string(),
            title: "Bar".to_string(),
            time: "18:00-22:00".to_string(),
            capacity: 2,
        }];
        let prefs = vec![Preference {
            id: "p1".to_string(),
            helper_id: "anna".to_string(),
            task_id: Some("t1".to_string()),
            priority: Some(1),
            is_substitute: false,
            desired_window: None,
            free_text: None,
        }];
        Snapshot::ingest(&tasks, prefs, Vec::new())
    }

    #[test]
    fn unassignable_lines_carry_names() {
        let line = describe_unassignable(
            &snapshot(),
            &Unassignable {
                id: "p1".to_string(),
                reason_code: ReasonCode::TimeConflict,
            },
        );
        assert_eq!(line, "anna -> Bar (t1) (preference p1): TimeConflict");
    }

    #[test]
    fn report_lists_roster() {
        let assignments = vec![Assignment {
            id: 1,
            helper_id: "anna".to_string(),
            task_id: "t1".to_string(),
            via_substitute: false,
            created_at: Utc::now(),
        }];
        let result = BatchResult {
            success: true,
            total_assigned: 1,
            regular_assigned_count: 1,
            substitute_assigned_count: 0,
            unassignable: Vec::new(),
            error: None,
        };
        let mut buf = Vec::new();
        write_report(&mut buf, &result, &snapshot(), &assignments).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("Assigned 1 (1 regular, 0 substitute)"));
        assert!(text.contains("  Bar (t1) [1/2]\n    anna\n"));
    }

    #[test]
    fn failed_run_says_nothing_stored() {
        let mut buf = Vec::new();
        write_report(&mut buf, &BatchResult::failed("disk full"), &snapshot(), &[]).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("FAILED: disk full"));
    }

    #[test]
    fn printing_to_stdout_reports_io_result() {
        assert!(print_batch_report(&BatchResult::failed("disk full"), &snapshot(), &[]).is_ok());
    }
}
