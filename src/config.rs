use std::path::PathBuf;

use crate::error::ConfigError;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_ADMIN_PASSWORD: &str = "admin123";
pub const DEFAULT_REPORT_PATH: &str = "assignment_report.txt";
pub const DEFAULT_EXPORT_PATH: &str = "assignments.csv";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    /// One batch run over CSV files, in memory
    Assign {
        tasks: PathBuf,
        preferences: PathBuf,
        assignments: Option<PathBuf>,
    },
    Web { port: u16 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub mode: Mode,
    pub admin_password: String,
    /// SQLite URL; `None` keeps everything in memory
    pub database_url: Option<String>,
    pub report_path: PathBuf,
    pub export_path: PathBuf,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::resolve(std::env::args().skip(1), |key| std::env::var(key).ok())
    }

    /// `args` excludes the program name
    pub fn resolve<I, F>(args: I, env: F) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = String>,
        F: Fn(&str) -> Option<String>,
    {
        let args: Vec<String> = args.into_iter().collect();
        let mode = match args.first().map(String::as_str) {
            Some("web") => {
                let raw = args.get(1).cloned().or_else(|| env("PORT"));
                let port = match raw {
                    Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidPort(raw))?,
                    None => DEFAULT_PORT,
                };
                Mode::Web { port }
            }
            Some("assign") if args.len() == 3 || args.len() == 4 => Mode::Assign {
                tasks: PathBuf::from(&args[1]),
                preferences: PathBuf::from(&args[2]),
                assignments: args.get(3).map(PathBuf::from),
            },
            _ => return Err(ConfigError::Usage),
        };

        let admin_password = match env("ADMIN_PASSWORD").filter(|p| !p.is_empty()) {
            Some(password) => password,
            None => {
                if matches!(mode, Mode::Web { .. }) {
                    log::warn!("ADMIN_PASSWORD not set, using the default password");
                }
                DEFAULT_ADMIN_PASSWORD.to_string()
            }
        };

        Ok(Config {
            mode,
            admin_password,
            database_url: env("DATABASE_URL").filter(|u| !u.trim().is_empty()),
            report_path: env("REPORT_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_REPORT_PATH)),
            export_path: env("EXPORT_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_EXPORT_PATH)),
        })
    }
}
