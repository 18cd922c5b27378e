//! Runtime Error Types
//!
//! Errors returned to behavior code and to callers of the actor system. None
//! of them unwind across actors: a failed spawn, send or listen is reported to
//! the immediate caller and every other actor keeps running.

use std::io;
use thiserror::Error;
use timer::TimerError;
use types::{ActorId, DescriptorId, StoreError};

/// Main runtime error type
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Destination actor does not exist (never spawned or already destroyed)
    #[error("dst actor {actor} not found")]
    ActorNotFound { actor: ActorId },

    /// No behavior registered under `module.function`
    #[error("behavior {module}.{function} not found")]
    BehaviorNotFound { module: String, function: String },

    /// The worker that should host an actor is gone
    #[error("Worker {worker} unavailable")]
    WorkerUnavailable { worker: usize },

    /// The actor already has an active listener
    #[error("listener exists for {actor} (requested port {port})")]
    DuplicateListener { actor: ActorId, port: u16 },

    /// Binding the listen socket failed
    #[error("Bind error on {address}: {source}")]
    Bind { address: String, source: io::Error },

    #[error("Descriptor {descriptor} not found")]
    DescriptorNotFound { descriptor: DescriptorId },

    /// The descriptor belongs to another actor
    #[error("Descriptor {descriptor} is not owned by {actor}")]
    DescriptorNotOwned {
        descriptor: DescriptorId,
        actor: ActorId,
    },

    /// The descriptor exists but cannot be used this way
    #[error("Descriptor {descriptor}: {reason}")]
    InvalidDescriptor {
        descriptor: DescriptorId,
        reason: String,
    },

    #[error(transparent)]
    Timer(#[from] TimerError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// Failure reported by behavior code
    #[error("Behavior error: {message}")]
    Behavior { message: String },

    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },

    #[error("I/O error: {message}")]
    Io { message: String, source: io::Error },

    /// The actor system is shutting down
    #[error("Actor system is shut down")]
    Shutdown,
}

/// Result type alias for runtime operations
pub type Result<T> = std::result::Result<T, RuntimeError>;

impl RuntimeError {
    pub fn actor_not_found(actor: ActorId) -> Self {
        Self::ActorNotFound { actor }
    }

    pub fn behavior_not_found(module: impl Into<String>, function: impl Into<String>) -> Self {
        Self::BehaviorNotFound {
            module: module.into(),
            function: function.into(),
        }
    }

    pub fn worker_unavailable(worker: usize) -> Self {
        Self::WorkerUnavailable { worker }
    }

    pub fn duplicate_listener(actor: ActorId, port: u16) -> Self {
        Self::DuplicateListener { actor, port }
    }

    pub fn bind(address: impl Into<String>, source: io::Error) -> Self {
        Self::Bind {
            address: address.into(),
            source,
        }
    }

    pub fn descriptor_not_found(descriptor: DescriptorId) -> Self {
        Self::DescriptorNotFound { descriptor }
    }

    pub fn descriptor_not_owned(descriptor: DescriptorId, actor: ActorId) -> Self {
        Self::DescriptorNotOwned { descriptor, actor }
    }

    pub fn invalid_descriptor(descriptor: DescriptorId, reason: impl Into<String>) -> Self {
        Self::InvalidDescriptor {
            descriptor,
            reason: reason.into(),
        }
    }

    /// Create a behavior error; behaviors return this to report failure
    pub fn behavior(message: impl Into<String>) -> Self {
        Self::Behavior {
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>, field: Option<&str>) -> Self {
        Self::Configuration {
            message: message.into(),
            field: field.map(|s| s.to_string()),
        }
    }

    pub fn io(message: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source,
        }
    }

    /// Recoverable misuse reported back to behavior code
    pub fn is_policy_violation(&self) -> bool {
        match self {
            RuntimeError::ActorNotFound { .. }
            | RuntimeError::BehaviorNotFound { .. }
            | RuntimeError::DuplicateListener { .. }
            | RuntimeError::DescriptorNotFound { .. }
            | RuntimeError::DescriptorNotOwned { .. }
            | RuntimeError::InvalidDescriptor { .. } => true,
            RuntimeError::Timer(e) => matches!(e, TimerError::UnknownTimer { .. }),
            RuntimeError::Store(e) => matches!(e, StoreError::InvalidValue { .. }),
            _ => false,
        }
    }

    /// Allocation failures surfaced instead of aborting
    pub fn is_resource_exhaustion(&self) -> bool {
        match self {
            RuntimeError::Timer(e) => matches!(e, TimerError::ResourceExhausted { .. }),
            RuntimeError::Store(e) => matches!(e, StoreError::AllocationFailed { .. }),
            _ => false,
        }
    }

    /// Get error category for metrics
    pub fn category(&self) -> &'static str {
        match self {
            RuntimeError::ActorNotFound { .. } => "actor_not_found",
            RuntimeError::BehaviorNotFound { .. } => "behavior_not_found",
            RuntimeError::WorkerUnavailable { .. } => "worker_unavailable",
            RuntimeError::DuplicateListener { .. } => "duplicate_listener",
            RuntimeError::Bind { .. } => "bind",
            RuntimeError::DescriptorNotFound { .. } => "descriptor_not_found",
            RuntimeError::DescriptorNotOwned { .. } => "descriptor_not_owned",
            RuntimeError::InvalidDescriptor { .. } => "invalid_descriptor",
            RuntimeError::Timer(_) => "timer",
            RuntimeError::Store(_) => "store",
            RuntimeError::Behavior { .. } => "behavior",
            RuntimeError::Configuration { .. } => "configuration",
            RuntimeError::Io { .. } => "io",
            RuntimeError::Shutdown => "shutdown",
        }
    }
}

fn clone_io(source: &io::Error) -> io::Error {
    io::Error::new(source.kind(), source.to_string())
}

impl Clone for RuntimeError {
    fn clone(&self) -> Self {
        match self {
            RuntimeError::ActorNotFound { actor } => RuntimeError::ActorNotFound { actor: *actor },
            RuntimeError::BehaviorNotFound { module, function } => RuntimeError::BehaviorNotFound {
                module: module.clone(),
                function: function.clone(),
            },
            RuntimeError::WorkerUnavailable { worker } => {
                RuntimeError::WorkerUnavailable { worker: *worker }
            }
            RuntimeError::DuplicateListener { actor, port } => RuntimeError::DuplicateListener {
                actor: *actor,
                port: *port,
            },
            RuntimeError::Bind { address, source } => RuntimeError::Bind {
                address: address.clone(),
                source: clone_io(source),
            },
            RuntimeError::DescriptorNotFound { descriptor } => RuntimeError::DescriptorNotFound {
                descriptor: *descriptor,
            },
            RuntimeError::DescriptorNotOwned { descriptor, actor } => {
                RuntimeError::DescriptorNotOwned {
                    descriptor: *descriptor,
                    actor: *actor,
                }
            }
            RuntimeError::InvalidDescriptor { descriptor, reason } => {
                RuntimeError::InvalidDescriptor {
                    descriptor: *descriptor,
                    reason: reason.clone(),
                }
            }
            RuntimeError::Timer(e) => RuntimeError::Timer(e.clone()),
            RuntimeError::Store(e) => RuntimeError::Store(e.clone()),
            RuntimeError::Behavior { message } => RuntimeError::Behavior {
                message: message.clone(),
            },
            RuntimeError::Configuration { message, field } => RuntimeError::Configuration {
                message: message.clone(),
                field: field.clone(),
            },
            RuntimeError::Io { message, source } => RuntimeError::Io {
                message: message.clone(),
                source: clone_io(source),
            },
            RuntimeError::Shutdown => RuntimeError::Shutdown,
        }
    }
}

impl From<io::Error> for RuntimeError {
    fn from(source: io::Error) -> Self {
        RuntimeError::Io {
            message: source.to_string(),
            source,
        }
    }
}
