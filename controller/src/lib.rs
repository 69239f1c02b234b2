#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::missing_docs_in_private_items)]

//! Manages the lifecycle of a single Kubernetes deployment: creates it from a
//! workload document, updates its replica count and image under optimistic
//! concurrency, and deletes it with cascading propagation. Alongside, a probe
//! counts the pods running in a namespace.
//!
//! Every operation is a one-shot call against the orchestrator's state. The
//! orchestrator is reached through the [`client::Orchestrator`] trait, so that
//! the manager and the probe can be driven by any implementation of it.

/// The calls made against the orchestrator, and their implementation over a
/// Kubernetes client.
pub mod client;
/// Creating, updating and deleting deployments.
pub mod deployment;
/// The errors returned by the operations of the controller.
pub mod error;
/// An in-memory orchestrator used in tests.
#[cfg(test)]
mod fake;
/// Counting the pods of a namespace.
pub mod probe;
/// Retrying operations that lose to a concurrent writer.
pub mod retry;
/// Sequencing the operations of the controller and printing their progress.
pub mod session;
/// Utilities and constants used across the controller.
pub mod utils;

/// A prelude that re-exports commonly used items.
pub mod prelude {
	pub use tracing::{debug, error, info, instrument, trace, warn};

	pub use crate::{
		client::{DeletePropagation, KubeOrchestrator, Orchestrator, OrchestratorError},
		deployment::{DeploymentManager, DeploymentRef, LifecycleState, UpdateAck},
		error::{ApplyError, ApplyErrorKind, Operation},
		probe::WorkloadProbe,
		retry::RetryPolicy,
		session::{print_spec, DemoOptions, Session, SessionError},
		utils::{constants, KubeDeploymentExt},
	};
}
