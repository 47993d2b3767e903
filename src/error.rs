use thiserror::Error;

#[derive(Error, Debug)]
pub enum HfsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid HFS signature: 0x{0:04X} (expected 0x4244)")]
    InvalidSignature(u16),

    #[error("bad name: {0}")]
    BadName(String),

    #[error("bad size: {0}")]
    BadSize(String),

    #[error("out of space: {0}")]
    OutOfSpace(String),

    #[error("malformed volume: {0}")]
    Malformed(String),

    #[error("extents overflow unsupported: {0}")]
    OverflowUnsupported(String),
}

pub type Result<T> = std::result::Result<T, HfsError>;
