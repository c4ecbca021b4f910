//! Thread pipeline: the host thread and the workers it bootstraps.

pub mod bootstrap;
pub mod host;

pub use bootstrap::{
    BootstrapMessage, FailureReason, Worker, WorkerHandle, WorkerProtocol, WorkerState,
};
pub use host::{HOST_PID, Host};
