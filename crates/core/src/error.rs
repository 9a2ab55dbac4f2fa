use crate::workflow::Screen;

/// Registration fields that failed validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("patient name is required")]
    MissingName,
    #[error("birth date is required")]
    MissingBirthDate,
    #[error("birth date must be formatted as YYYY-MM-DD, got: '{0}'")]
    InvalidBirthDate(String),
    #[error("address is required")]
    MissingAddress,
    #[error("consent must be given before recording")]
    ConsentRequired,
}

#[derive(Debug, thiserror::Error)]
pub enum TriageError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("invalid registration: {0}")]
    Validation(#[from] ValidationError),
    #[error("cannot {action} from the {from} screen")]
    InvalidTransition { from: Screen, action: &'static str },
    #[error("history record not found: {0}")]
    RecordNotFound(String),
    #[error("no analysis is in progress")]
    NoActiveAnalysis,
    #[error("audio capture unavailable: {0}")]
    CaptureUnavailable(String),
    #[error("no history available to export")]
    EmptyHistory,

    #[error("failed to create storage directory: {0}")]
    StorageDirCreation(std::io::Error),
    #[error("failed to read history file: {0}")]
    FileRead(std::io::Error),
    #[error("failed to write history file: {0}")]
    FileWrite(std::io::Error),
    #[error("failed to serialize history: {0}")]
    Serialization(serde_json::Error),
    #[error("failed to deserialize history: {0}")]
    Deserialization(serde_json::Error),
}

pub type TriageResult<T> = std::result::Result<T, TriageError>;
