use thiserror::Error;

pub type MarkupResult<T> = Result<T, MarkupError>;

#[derive(Error, Debug, Clone)]
pub enum MarkupError {
    #[error("Invalid selector '{selector}'")]
    InvalidSelector { selector: String },

    #[error("Failed to read '{path}': {reason}")]
    Io { path: String, reason: String },
}
