use std::fmt::{Display, Formatter};

use thiserror::Error;

use crate::client::OrchestratorError;

/// An operation of the controller, used to give context to an [`ApplyError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
	/// Creating a deployment
	Create,
	/// Reading the current state of a deployment
	Get,
	/// Updating the replicas and image of a deployment
	Update,
	/// Deleting a deployment
	Delete,
	/// Counting the pods in a namespace
	CountActive,
}

impl Display for Operation {
	fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
		write!(
			formatter,
			"{}",
			match self {
				Self::Create => "create deployment",
				Self::Get => "get deployment",
				Self::Update => "update deployment",
				Self::Delete => "delete deployment",
				Self::CountActive => "count pods in namespace",
			}
		)
	}
}

/// The error returned by every operation of the controller. It always carries
/// the operation that failed and the resource (or namespace) it was acting on,
/// so that an absent resource, a transport failure and a lost race can be told
/// apart.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to {operation} `{name}`: {kind}")]
pub struct ApplyError {
	/// The operation that failed
	pub operation: Operation,
	/// The name of the deployment, or the namespace for [`Operation::CountActive`]
	pub name: String,
	/// What went wrong
	pub kind: ApplyErrorKind,
}

impl ApplyError {
	/// Creates a new error for the given operation and resource.
	pub fn new(operation: Operation, name: impl Into<String>, kind: ApplyErrorKind) -> Self {
		Self {
			operation,
			name: name.into(),
			kind,
		}
	}

	/// Whether the resource the operation acted on does not exist.
	pub fn is_not_found(&self) -> bool {
		self.kind == ApplyErrorKind::NotFound
	}
}

/// What went wrong in an [`ApplyError`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApplyErrorKind {
	/// A deployment with the same name already exists.
	#[error("a deployment with that name already exists")]
	AlreadyExists,
	/// The orchestrator refused the shape of the deployment, for example when
	/// the selector does not match the pod template labels.
	#[error("the deployment was rejected: {0}")]
	RejectedBySchema(String),
	/// The deployment does not exist.
	#[error("the deployment does not exist")]
	NotFound,
	/// Every attempt at writing the deployment lost to a concurrent writer.
	#[error("the deployment kept being modified concurrently, gave up after {attempts} attempt(s)")]
	ConcurrentModification {
		/// The number of attempts made
		attempts: u32,
	},
	/// The orchestrator could not be reached.
	#[error("could not reach the orchestrator: {0}")]
	Unreachable(String),
	/// The orchestrator answered in a way the controller does not expect, or
	/// the deployment it returned cannot be worked with.
	#[error("unexpected response from the orchestrator: {0}")]
	Unexpected(String),
}

impl ApplyErrorKind {
	/// Whether this is a lost race against a concurrent writer, which is the
	/// only retriable condition.
	pub fn is_concurrent_modification(&self) -> bool {
		matches!(self, Self::ConcurrentModification { .. })
	}
}

impl From<OrchestratorError> for ApplyErrorKind {
	fn from(err: OrchestratorError) -> Self {
		match err {
			OrchestratorError::NotFound => Self::NotFound,
			OrchestratorError::AlreadyExists => Self::AlreadyExists,
			OrchestratorError::Conflict(_) => Self::ConcurrentModification { attempts: 1 },
			OrchestratorError::Invalid(message) => Self::RejectedBySchema(message),
			OrchestratorError::Status { code, message } => {
				Self::Unexpected(format!("status {}: {}", code, message))
			}
			OrchestratorError::Transport(message) => Self::Unreachable(message),
		}
	}
}
