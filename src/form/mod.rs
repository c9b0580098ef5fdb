pub mod submission;
pub mod export;

pub use submission::{IdRef, OneOrMany, PreferenceSubmission};
pub use export::{assignments_to_csv, export_assignments_to_csv};
