/// Domain-level errors raised while validating task input.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    Validation(String),
}
