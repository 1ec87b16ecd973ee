// src/config/mod.rs

//! Backend configuration for runs.
//!
//! Responsibilities:
//! - Define the TOML-backed backend configuration (`model.rs`).
//! - Load it from disk and resolve the tracking URI (`loader.rs`).

pub mod loader;
pub mod model;

pub use loader::{load_backend_config, resolve_tracking_uri};
pub use model::{
    BackendConfig, ContainerArgValue, ContainerArgs, RunSettings, container_args_to_cli,
    container_args_to_relaunch, parse_container_arg,
};
