//! Stigpost daemon library.
//!
//! This library exposes internal modules for integration testing.
//! In production, `stigpost-daemon` is used as a binary (main.rs).

pub mod cli;
pub mod descriptor;
pub mod launcher;
pub mod logging;
pub mod orchestrator;

pub use descriptor::JobDescriptor;
pub use launcher::{ProcessLauncher, WorkerJob, WorkerLauncher, WorkerProcess};
pub use orchestrator::{BatchSummary, Orchestrator};
