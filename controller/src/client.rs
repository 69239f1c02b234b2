use std::future::Future;

use k8s_openapi::api::{apps::v1::Deployment as KubeDeployment, core::v1::Pod};
use kube::{
	api::{DeleteParams, ListParams, PostParams, PropagationPolicy},
	core::ErrorResponse,
	Api,
	Client,
	Error as KubeError,
};
use thiserror::Error;

use crate::prelude::*;

/// The calls the controller makes against the orchestrator. Every call is a
/// single round trip against the orchestrator's authoritative state, nothing is
/// cached between calls.
pub trait Orchestrator {
	/// Creates a new deployment. Fails with [`OrchestratorError::AlreadyExists`]
	/// if one with the same name is already present.
	fn create_deployment(
		&self,
		namespace: &str,
		deployment: &KubeDeployment,
	) -> impl Future<Output = Result<KubeDeployment, OrchestratorError>>;

	/// Fetches the current state of a deployment, including its resource
	/// version.
	fn get_deployment(
		&self,
		namespace: &str,
		name: &str,
	) -> impl Future<Output = Result<KubeDeployment, OrchestratorError>>;

	/// Writes back a deployment. The resource version carried in the body is
	/// checked by the orchestrator, and a stale one results in
	/// [`OrchestratorError::Conflict`].
	fn replace_deployment(
		&self,
		namespace: &str,
		name: &str,
		deployment: &KubeDeployment,
	) -> impl Future<Output = Result<KubeDeployment, OrchestratorError>>;

	/// Deletes a deployment, removing its dependents as per the given
	/// propagation.
	fn delete_deployment(
		&self,
		namespace: &str,
		name: &str,
		propagation: DeletePropagation,
	) -> impl Future<Output = Result<(), OrchestratorError>>;

	/// Lists every pod in the given namespace.
	fn list_pods(&self, namespace: &str) -> impl Future<Output = Result<Vec<Pod>, OrchestratorError>>;
}

/// How the dependents of a deleted deployment are cleaned up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeletePropagation {
	/// Dependents are removed before the deletion of the parent is considered
	/// complete.
	#[default]
	Foreground,
	/// The parent is removed right away and its dependents are cleaned up
	/// afterwards.
	Background,
}

impl From<DeletePropagation> for PropagationPolicy {
	fn from(propagation: DeletePropagation) -> Self {
		match propagation {
			DeletePropagation::Foreground => PropagationPolicy::Foreground,
			DeletePropagation::Background => PropagationPolicy::Background,
		}
	}
}

/// The ways a call to the orchestrator can fail.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrchestratorError {
	/// The resource does not exist.
	#[error("resource not found")]
	NotFound,
	/// A resource with the same name already exists.
	#[error("resource already exists")]
	AlreadyExists,
	/// The resource was modified since it was fetched.
	#[error("resource version conflict: {0}")]
	Conflict(String),
	/// The orchestrator refused the shape of the resource.
	#[error("resource is invalid: {0}")]
	Invalid(String),
	/// The orchestrator answered with a status the controller does not
	/// handle specifically.
	#[error("orchestrator responded with status {code}: {message}")]
	Status {
		/// The HTTP status code of the response
		code: u16,
		/// The message returned by the orchestrator
		message: String,
	},
	/// The orchestrator could not be reached, or the response could not be
	/// read.
	#[error("could not reach the orchestrator: {0}")]
	Transport(String),
}

impl From<KubeError> for OrchestratorError {
	fn from(err: KubeError) -> Self {
		match err {
			KubeError::Api(ErrorResponse { code: 404, .. }) => Self::NotFound,
			KubeError::Api(ErrorResponse {
				code: 409, reason, ..
			}) if reason == "AlreadyExists" => Self::AlreadyExists,
			KubeError::Api(ErrorResponse {
				code: 409, message, ..
			}) => Self::Conflict(message),
			KubeError::Api(ErrorResponse {
				code: 400 | 422,
				message,
				..
			}) => Self::Invalid(message),
			KubeError::Api(ErrorResponse { code, message, .. }) => Self::Status { code, message },
			err => Self::Transport(err.to_string()),
		}
	}
}

/// An [`Orchestrator`] backed by a connected Kubernetes client.
#[derive(Clone)]
pub struct KubeOrchestrator {
	/// The client used for every call. Cloning it is cheap.
	client: Client,
}

impl KubeOrchestrator {
	/// Wraps a connected client.
	pub fn new(client: Client) -> Self {
		Self { client }
	}

	/// The deployments API scoped to a namespace.
	fn deployments(&self, namespace: &str) -> Api<KubeDeployment> {
		Api::namespaced(self.client.clone(), namespace)
	}
}

impl Orchestrator for KubeOrchestrator {
	async fn create_deployment(
		&self,
		namespace: &str,
		deployment: &KubeDeployment,
	) -> Result<KubeDeployment, OrchestratorError> {
		trace!("POST deployment in namespace `{}`", namespace);
		Ok(self
			.deployments(namespace)
			.create(&PostParams::default(), deployment)
			.await?)
	}

	async fn get_deployment(
		&self,
		namespace: &str,
		name: &str,
	) -> Result<KubeDeployment, OrchestratorError> {
		trace!("GET deployment `{}/{}`", namespace, name);
		Ok(self.deployments(namespace).get(name).await?)
	}

	async fn replace_deployment(
		&self,
		namespace: &str,
		name: &str,
		deployment: &KubeDeployment,
	) -> Result<KubeDeployment, OrchestratorError> {
		trace!(
			"PUT deployment `{}/{}` at version {:?}",
			namespace,
			name,
			deployment.metadata.resource_version
		);
		Ok(self
			.deployments(namespace)
			.replace(name, &PostParams::default(), deployment)
			.await?)
	}

	async fn delete_deployment(
		&self,
		namespace: &str,
		name: &str,
		propagation: DeletePropagation,
	) -> Result<(), OrchestratorError> {
		trace!(
			"DELETE deployment `{}/{}` with {:?} propagation",
			namespace,
			name,
			propagation
		);
		self.deployments(namespace)
			.delete(
				name,
				&DeleteParams {
					propagation_policy: Some(propagation.into()),
					..DeleteParams::default()
				},
			)
			.await?;
		Ok(())
	}

	async fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>, OrchestratorError> {
		trace!("LIST pods in namespace `{}`", namespace);
		Ok(Api::<Pod>::namespaced(self.client.clone(), namespace)
			.list(&ListParams::default())
			.await?
			.items)
	}
}
