// Shared identifier types and constants used across the Palaver crates.

pub mod constants;
pub mod error;
pub mod types;

pub use error::IdError;
pub use types::{ItemId, UserKey};
