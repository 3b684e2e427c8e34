use thiserror::Error;

use crate::engine::message::Handle;

/// Handle registry failures.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// Registering a handle that is already present. A programming error;
    /// the pipeline treats it as fatal.
    #[error("duplicate handle {0}")]
    DuplicateHandle(Handle),
    /// Resolving a handle that is unknown or already retired. Recoverable:
    /// the message targeting it is dropped with a log entry.
    #[error("handle {0} not found")]
    HandleNotFound(Handle),
}

/// Compute module instantiation failures.
#[derive(Clone, Copy, Debug, Error, PartialEq)]
pub enum ModuleError {
    #[error("unsupported module image version {0}")]
    UnsupportedVersion(u32),
    #[error("unsupported fft size {0}")]
    UnsupportedFftSize(u32),
    #[error("module image parameter out of range: {0}")]
    InvalidParameter(&'static str),
}

/// Why an instance failed to come up.
#[derive(Clone, Copy, Debug, Error, PartialEq)]
pub enum InitFault {
    #[error(transparent)]
    Module(#[from] ModuleError),
    /// A second `InitPayload` arrived for an instance that already began
    /// initialization. The controller is single-shot; retries are the
    /// host's responsibility.
    #[error("instance already initialized")]
    AlreadyInitialized,
    /// The instantiation thread could not be spawned.
    #[error("failed to spawn instantiation thread")]
    SpawnFailed,
}

/// Asynchronous initialization fault, reported once per failed instance
/// through [`Pipeline::faults`](crate::engine::worker::Pipeline::faults).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FaultReport {
    pub handle: Handle,
    pub fault: InitFault,
}

/// Inbound edge backpressure.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum SubmitError {
    #[error("pipeline submission queue is full")]
    QueueFull,
    #[error("pipeline is shut down")]
    Closed,
}
