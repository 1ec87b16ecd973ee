// src/exec/mod.rs

//! Process execution layer.
//!
//! - [`spawn`] starts commands as process-group leaders.
//! - [`handle`] defines [`RunHandle`] and the process-backed
//!   [`LocalRunHandle`].

pub mod handle;
pub mod spawn;

pub use handle::{LocalRunHandle, RunHandle};
pub use spawn::{ProcessGroup, shell_command, spawn_shell};
