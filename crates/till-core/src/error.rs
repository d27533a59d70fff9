use thiserror::Error;

pub type TillResult<T> = Result<T, TillError>;

#[derive(Debug, Error)]
pub enum TillError {
    #[error("storage error: {0}")]
    Storage(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("unknown entity type: {0}")]
    UnknownEntity(String),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversions_keep_the_source_message() {
        let err: TillError = serde_json::from_str::<u32>("x").unwrap_err().into();
        assert!(matches!(err, TillError::Serde(_)));
        assert!(err.to_string().starts_with("serialization error: "));

        let err: TillError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert_eq!(err.to_string(), "I/O error: gone");
    }
}
