use super::error::KeydirError;

pub type KeydirResult<T> = std::result::Result<T, KeydirError>;
