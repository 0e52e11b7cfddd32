use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("domain validation failed: {message}")]
    Validation { message: String },
    #[error("`{operation}` is not supported by entity `{entity}`")]
    Unsupported {
        entity: String,
        operation: &'static str,
    },
}

impl DomainError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn unsupported(entity: impl Into<String>, operation: &'static str) -> Self {
        Self::Unsupported {
            entity: entity.into(),
            operation,
        }
    }
}
