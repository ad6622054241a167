use thiserror::Error;

#[derive(Error, Debug)]
pub enum SheetSyncError {
    #[error("Invalid field - table:{table} field:{header} ({reason})")]
    Schema {
        table: String,
        header: String,
        reason: String,
    },

    #[error("Store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("Authentication failed: {0}")]
    Auth(String),

    /// A remote call failed part-way through a publish. `step` counts the
    /// sub-steps that completed before the failure.
    #[error("Remote call failed at step {step}/{total}: {message}")]
    RemoteTransient {
        step: usize,
        total: usize,
        message: String,
    },

    #[error("Remote rejected request ({status}): {message}")]
    Remote { status: u16, message: String },

    #[error("Remote file not found: {path}")]
    NotFound { path: String },

    #[error("Malformed version entry: '{segment}'")]
    VersionParse { segment: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("{0}")]
    Other(String),
}

impl SheetSyncError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, SheetSyncError::NotFound { .. })
    }

    /// Schema errors only abort the sheet they were raised for.
    pub fn is_schema(&self) -> bool {
        matches!(self, SheetSyncError::Schema { .. })
    }

    /// Attach the publish step index to a transport-level failure.
    pub fn at_step(self, step: usize, total: usize) -> Self {
        match self {
            SheetSyncError::RemoteTransient { message, .. } => {
                SheetSyncError::RemoteTransient {
                    step,
                    total,
                    message,
                }
            }
            SheetSyncError::Remote { status, message } => SheetSyncError::RemoteTransient {
                step,
                total,
                message: format!("HTTP {status}: {message}"),
            },
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, SheetSyncError>;
