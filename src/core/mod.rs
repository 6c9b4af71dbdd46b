// Public modules
pub mod defaults;
pub mod dependencies;
pub mod deploy;
pub mod descriptor;
pub mod envfile;
pub mod error;
pub mod health;
pub mod labels;
pub mod lock;
pub mod project;
pub mod remote;
pub mod server;
pub mod service;
pub mod ssh;

// Internal modules - not part of public API
pub(crate) mod config;
pub(crate) mod paths;
pub(crate) mod runtime;

// Re-export common types for convenience
pub use error::{Error, ErrorCode, Result};
pub use remote::{CommandOutput, RemoteExecutor, SourceSync};
