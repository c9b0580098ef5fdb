use std::sync::Arc;

use festival_helpers::config::{Config, Mode};
use festival_helpers::display::{print_batch_report, write_report_to_file};
use festival_helpers::form::export_assignments_to_csv;
use festival_helpers::parser::{load_assignments_from_path, load_preferences_from_path, load_tasks_from_path};
use festival_helpers::service::AssignmentService;
use festival_helpers::store::{MemoryStore, SqliteStore};
use festival_helpers::web::{self, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::from_env()?;
    match config.mode.clone() {
        Mode::Web { port } => {
            let service = match &config.database_url {
                Some(url) => AssignmentService::from_store(Arc::new(SqliteStore::connect(url).await?)),
                None => {
                    log::warn!("DATABASE_URL not set, data is kept in memory only");
                    AssignmentService::from_store(Arc::new(MemoryStore::new()))
                }
            };

            println!("Starting web server on port {}...", port);
            println!("Access the API at http://localhost:{}/api", port);
            web::start_server(port, AppState::new(service, config.admin_password)).await?;
        }
        Mode::Assign {
            tasks,
            preferences,
            assignments,
        } => {
            println!("Loading tasks and preferences from CSV...");
            let tasks = load_tasks_from_path(&tasks)?;
            let preferences = load_preferences_from_path(&preferences)?;
            let existing = match &assignments {
                Some(path) => load_assignments_from_path(path)?,
                None => Vec::new(),
            };
            println!(
                "Loaded {} tasks, {} preferences, {} existing assignments",
                tasks.len(),
                preferences.len(),
                existing.len()
            );

            let store = Arc::new(MemoryStore::with_data(Vec::new(), Vec::new(), existing)?);
            let service = AssignmentService::from_store(store);
            service.import_tasks(tasks).await?;
            service.import_preferences(preferences).await?;

            println!("\n=== Running assignment ===");
            let result = service.run_batch().await;
            let snapshot = service.snapshot().await?;
            print_batch_report(&result, &snapshot, &snapshot.assignments)?;

            println!("\n=== Writing results to files ===");
            write_report_to_file(&result, &snapshot, &snapshot.assignments, &config.report_path)?;
            export_assignments_to_csv(&snapshot.assignments, &config.export_path)?;
            println!("Results saved to:");
            println!("  - {}", config.report_path.display());
            println!("  - {}", config.export_path.display());

            if !result.success {
                return Err(result.error.unwrap_or_else(|| "assignment run failed".to_string()).into());
            }
        }
    }

    Ok(())
}
