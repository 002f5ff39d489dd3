pub mod config;
pub mod error;
pub mod types;

pub use config::ConversionsConfig;
pub use error::{ConversionError, ConversionResult};
