//! Configuration for the session store
//!
//! Settings are read from a TOML file and can be overridden from the command
//! line. Priority order: CLI -> file -> defaults.

pub mod loader;
pub mod merger;

pub use loader::{load_config, save_config, LockConfig, StoreConfig};
pub use merger::{ConfigMerger, PartialConfig};
