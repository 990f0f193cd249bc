pub mod config;
pub mod error;
pub mod types;

pub use config::CinematchConfig;
pub use error::{CinematchError, EmbedError, Result};
pub use types::*;
