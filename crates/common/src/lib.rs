pub mod config;
pub mod error;
pub mod ids;
pub mod types;

pub use error::{RasboraError, Result};
pub use ids::*;
