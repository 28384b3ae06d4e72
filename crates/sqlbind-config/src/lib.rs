pub mod annotations;
pub mod config;
pub mod duration;
pub mod error;

pub use config::{generate_default_config, Config};
pub use error::{ConfigError, Result};

#[cfg(test)]
pub mod test_utils;
