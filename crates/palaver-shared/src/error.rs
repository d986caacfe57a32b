use thiserror::Error;

#[derive(Error, Debug)]
pub enum IdError {
    #[error("Invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("Expected {expected} bytes, got {got}")]
    Length { expected: usize, got: usize },
}
