pub mod ast;
pub mod loader;
pub mod parser;

pub use ast::*;
pub use loader::load_config;

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("config syntax error: {0}")]
    Syntax(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}
