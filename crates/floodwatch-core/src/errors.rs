/// Core error type.
///
/// Adapter crates map their specific errors into this type so the supervisor
/// and the data source can treat failures consistently (log and recover vs
/// refuse to start).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("credential verification failed: {0}")]
    Credentials(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("reply channel error: {0}")]
    Reply(String),

    #[error("invalid supervisor state: {0}")]
    State(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("external error: {0}")]
    External(String),
}

pub type Result<T> = std::result::Result<T, Error>;
