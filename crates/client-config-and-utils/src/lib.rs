//! Configuration, paths, logging and shared error types for the CardKing client.

mod config;
mod error;
mod logging;
mod paths;

pub use config::{
    Config, Endpoints, Environment, DEFAULT_API_BASE_URL, DEFAULT_APP_ID, DEFAULT_APP_KEY,
    DEFAULT_APP_VERSION, DEFAULT_LOG_LEVEL, DEFAULT_REQUEST_TIMEOUT_MS,
};
pub use error::{CoreError, CoreResult};
pub use logging::{init_logging, parse_level};
pub use paths::Paths;
