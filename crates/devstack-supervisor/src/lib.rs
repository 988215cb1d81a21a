pub mod clock;
pub mod config;
pub mod container;
pub mod error;
pub mod logs;
pub mod orchestrate;
pub mod probe;
pub mod process_control;
pub mod report;
pub mod spec;
pub mod store;
pub mod supervisor;

#[cfg(test)]
mod testing;

pub use error::SupervisorError;
pub use orchestrate::{CancelFlag, RestartReport, ShutdownReport, StartupError, StartupReport};
pub use supervisor::{Collaborators, ServiceHandle, Stopped, Supervisor};
