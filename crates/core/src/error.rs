use thiserror::Error;

pub type ConversionResult<T> = Result<T, ConversionError>;

#[derive(Error, Debug)]
pub enum ConversionError {
    #[error("Storage error: {0}")]
    Store(String),

    #[error("Invalid conversion id pattern: {0}")]
    Pattern(String),
}
