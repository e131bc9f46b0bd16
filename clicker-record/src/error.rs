use thiserror::Error;

/// Error types for capturing and replaying input
#[derive(Debug, Error)]
pub enum ClickerError {
    /// The OS input hook could not be installed or is owned by another session
    #[error("Input capture unavailable: {0}")]
    CaptureUnavailable(String),

    /// A recorded action is malformed (missing or unsortable timestamp, unknown type, ...)
    #[error("Invalid action data: {0}")]
    InvalidActionData(String),

    /// A single action could not be reproduced on the OS input subsystem
    #[error("Failed to synthesize action: {0}")]
    ActionSynthesis(String),

    /// Speed factor was zero, negative or not finite
    #[error("Speed factor must be a finite number greater than zero, got {0}")]
    InvalidSpeedFactor(f64),

    /// Repeat count must be at least one
    #[error("Repeat count must be at least 1, got {0}")]
    InvalidRepeatCount(u32),

    /// A schedule could not be built from the given parameters
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    /// The replay engine ignored a launch because another playback is in flight
    #[error("Replay engine is busy with another playback")]
    EngineBusy,

    /// A scheduled playback run ended with an error
    #[error("Scheduled playback aborted: {0}")]
    ScheduleAborted(String),

    /// Error when serializing or deserializing JSON
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for capture and replay operations
pub type Result<T> = std::result::Result<T, ClickerError>;
