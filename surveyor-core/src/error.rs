use surveyor_scanner::ScanError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Scan error: {0}")]
    Scan(#[from] ScanError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Test generation failed: {0}")]
    Generation(#[from] GenerationError),

    #[error("Test execution failed: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0} not found")]
    NotFound(String),
}

/// Failures of the prompt-to-test pipeline. Kept apart from [`CoreError`]
/// so callers can tell a broken generation from a missing prompt.
#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("OPENAI_API_KEY not set")]
    MissingApiKey,

    #[error("plan generation timed out after {0}s")]
    Timeout(u64),

    #[error("request to the model failed: {0}")]
    Request(String),

    #[error("model response is not valid JSON: {0}")]
    MalformedResponse(String),

    #[error("model returned an empty test plan")]
    EmptyPlan,

    #[error("invalid test plan: {0}")]
    InvalidPlan(String),

    #[error("generated code failed validation: {0}")]
    InvalidCode(String),
}

#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("test runner not found: {0}")]
    RunnerNotFound(String),

    #[error("could not start test runner: {0}")]
    Spawn(String),

    #[error("test run exceeded {0}s and was killed")]
    Timeout(u64),

    #[error("no test files generated")]
    NoTestFiles,

    #[error("failed to read test results: {0}")]
    UnreadableReport(String),

    #[error("runner IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
