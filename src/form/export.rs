use std::io;
use std::path::Path;

use csv::Writer;

use crate::error::ImportError;
use crate::schedule::types::Assignment;

const HEADER: [&str; 5] = ["id", "helper", "task", "via_substitute", "created_at"];

/// Writes assignments in the column layout `parser::load_assignments` reads
fn write_assignments<W: io::Write>(wtr: &mut Writer<W>, assignments: &[Assignment]) -> Result<(), ImportError> {
    wtr.write_record(HEADER)?;
    for a in assignments {
        let id = a.id.to_string();
        let created_at = a.created_at.to_rfc3339();
        wtr.write_record([
            id.as_str(),
            a.helper_id.as_str(),
            a.task_id.as_str(),
            if a.via_substitute { "true" } else { "false" },
            created_at.as_str(),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn export_assignments_to_csv(assignments: &[Assignment], csv_path: &Path) -> Result<(), ImportError> {
    let mut wtr = Writer::from_path(csv_path)?;
    write_assignments(&mut wtr, assignments)
}

/// Same layout, as a string for HTTP downloads
pub fn assignments_to_csv(assignments: &[Assignment]) -> Result<String, ImportError> {
    let mut wtr = Writer::from_writer(Vec::new());
    write_assignments(&mut wtr, assignments)?;
    let bytes = wtr
        .into_inner()
        .map_err(|e| ImportError::Invalid(format!("csv buffer: {}", e)))?;
    String::from_utf8(bytes).map_err(|e| ImportError::Invalid(format!("csv buffer: {}", e)))
}
