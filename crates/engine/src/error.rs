use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("storage error: {0}")]
    Storage(#[from] taskdeck_storage::StorageError),

    #[error("core error: {0}")]
    Core(#[from] taskdeck_core::CoreError),

    #[error("no {kind} with id {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("project {0} is not open")]
    ProjectNotOpen(String),

    #[error("remote backend not configured")]
    RemoteUnavailable,
}

impl EngineError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }
}
