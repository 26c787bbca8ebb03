//! Arbiter SDK
//!
//! Shared contract types for the Arbiter workflow engine and the assistants
//! that talk to it: the error taxonomy, the lifecycle states, the operation
//! registry and the standard response envelope.

/// Error types and handling
pub mod errors;

/// Lifecycle states and the operation registry
pub mod types;

/// Standard response envelope
pub mod envelope;

// Re-export commonly used types
pub use envelope::{EnvelopeMetadata, Instructions, ResponseEnvelope};
pub use errors::{ArbiterErrorExt, WorkflowError};
pub use types::{ApprovalStage, Operation, TaskState};
