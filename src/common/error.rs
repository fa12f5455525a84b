use thiserror::Error;

#[derive(Error, Debug)]
pub enum KeydirError {
    #[error("I/O Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    /// CAS precondition did not match the current version. Nothing was mutated.
    #[error("modified")]
    Modified,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Failed to acquire lock: {0}")]
    LockPoisoned(String),
}
