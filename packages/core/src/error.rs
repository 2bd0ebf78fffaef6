use thiserror::Error;

/// Unified application error.
///
/// Startup and serving failures funnel through here so `main` can log
/// one line and exit.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("Server error: {0}")]
    Server(#[from] std::io::Error),
}
