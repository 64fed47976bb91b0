//! Utility modules for error handling, configuration and file naming

pub mod config;
pub mod error;
pub mod filename;
pub mod http;

// Re-export for convenience
pub use config::{ResolverKind, Settings};
pub use error::{ErrorKind, Result, TubeloaderError};
pub use filename::sanitize_filename;
