use thiserror::Error;

/// Rejection reasons for caller-supplied workspace fields.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{field} invalid, length must be in [{min},{max}], got {len}")]
    Length {
        field: &'static str,
        min: usize,
        max: usize,
        len: usize,
    },

    #[error("{field} invalid, only lowercase letters and digits are allowed")]
    Charset { field: &'static str },

    #[error("port invalid, must be in [1024,65535], got {0}")]
    Port(i64),

    #[error("git repository invalid: {0}")]
    GitRepository(String),

    #[error("mount path invalid: {0}")]
    MountPath(String),

    #[error("resource limit {field} invalid: {reason}")]
    Quantity { field: &'static str, reason: String },
}

pub type Result<T> = std::result::Result<T, ValidationError>;
