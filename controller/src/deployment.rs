use std::fmt::{Display, Formatter};

use k8s_openapi::{
	api::{
		apps::v1::{Deployment as KubeDeployment, DeploymentSpec},
		core::v1::{Container, ContainerPort, PodSpec, PodTemplateSpec, ResourceRequirements},
	},
	apimachinery::pkg::{api::resource::Quantity, apis::meta::v1::LabelSelector},
};
use kube::core::ObjectMeta;
use models::prelude::*;

use crate::{
	client::{DeletePropagation, Orchestrator, OrchestratorError},
	error::{ApplyError, ApplyErrorKind, Operation},
	prelude::*,
	retry::{self, RetryError, RetryPolicy},
	utils::{constants, KubeDeploymentExt},
};

/// Manages the lifecycle of deployments in a single namespace. The manager
/// keeps no copy of the deployments it manages: every operation works against
/// the orchestrator's current state, and updates re-fetch the deployment on
/// every attempt.
pub struct DeploymentManager<O> {
	/// The orchestrator every call is made against
	orchestrator: O,
	/// The namespace the managed deployments live in
	namespace: String,
	/// How often an update is attempted when it loses to a concurrent writer
	retry_policy: RetryPolicy,
}

/// A reference to a deployment, as returned by the orchestrator after a write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentRef {
	/// The name of the deployment
	pub name: String,
	/// The namespace of the deployment
	pub namespace: String,
	/// The unique ID the orchestrator assigned to the deployment
	pub uid: Option<String>,
	/// The resource version of the deployment after the write
	pub resource_version: Option<String>,
}

impl DeploymentRef {
	/// Describes a deployment as returned by a write.
	fn new(name: &str, namespace: &str, deployment: &KubeDeployment) -> Self {
		Self {
			name: name.to_string(),
			namespace: deployment
				.metadata
				.namespace
				.clone()
				.unwrap_or_else(|| namespace.to_string()),
			uid: deployment.metadata.uid.clone(),
			resource_version: deployment.metadata.resource_version.clone(),
		}
	}
}

/// The acknowledgement of a successful update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateAck {
	/// The deployment as it was written
	pub deployment: DeploymentRef,
	/// The number of attempts the update took
	pub attempts: u32,
}

/// The lifecycle state of a deployment, as observed from the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
	/// The deployment does not exist
	Absent,
	/// The deployment exists and its latest spec has been rolled out
	Present,
	/// The deployment exists, but its latest spec is still being rolled out
	Updating,
	/// The deployment is being deleted, waiting on its dependents
	Deleting,
}

impl LifecycleState {
	/// Works out the state of an existing deployment.
	pub fn of(deployment: &KubeDeployment) -> Self {
		if deployment.metadata.deletion_timestamp.is_some() {
			return Self::Deleting;
		}

		let status = deployment.status.as_ref();
		let observed_generation = status.and_then(|status| status.observed_generation);
		if deployment.metadata.generation > observed_generation {
			return Self::Updating;
		}

		let desired = deployment.replicas().unwrap_or(1);
		let updated = status.map(|status| status.updated_replicas.unwrap_or(0));
		match updated {
			Some(updated) if updated < desired => Self::Updating,
			_ => Self::Present,
		}
	}
}

impl Display for LifecycleState {
	fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
		write!(
			formatter,
			"{}",
			match self {
				Self::Absent => "absent",
				Self::Present => "present",
				Self::Updating => "updating",
				Self::Deleting => "deleting",
			}
		)
	}
}

impl<O> DeploymentManager<O>
where
	O: Orchestrator,
{
	/// Creates a manager for the default namespace, with the default retry
	/// policy.
	pub fn new(orchestrator: O) -> Self {
		Self {
			orchestrator,
			namespace: constants::DEFAULT_NAMESPACE.to_string(),
			retry_policy: RetryPolicy::default(),
		}
	}

	/// Sets the namespace the managed deployments live in.
	pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
		self.namespace = namespace.into();
		self
	}

	/// Sets how often an update is attempted when it conflicts.
	pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
		self.retry_policy = retry_policy;
		self
	}

	/// The namespace the managed deployments live in.
	pub fn namespace(&self) -> &str {
		&self.namespace
	}

	/// Creates a deployment from the given spec. This is never retried, since a
	/// duplicate create is a mistake of the caller and not a transient
	/// condition.
	#[instrument(skip_all, fields(name = %spec.name, namespace = %self.namespace))]
	pub async fn create(&self, spec: &WorkloadSpec) -> Result<DeploymentRef, ApplyError> {
		let fail = |kind: ApplyErrorKind| ApplyError::new(Operation::Create, &spec.name, kind);

		if !spec.labels_match() {
			warn!(
				"Selector label `{}` does not match template label `{}`",
				spec.selector_label, spec.template_label
			);
		}
		let deployment = build_deployment(spec, &self.namespace).map_err(fail)?;

		info!("Creating deployment");
		let created = self
			.orchestrator
			.create_deployment(&self.namespace, &deployment)
			.await
			.map_err(|err| fail(err.into()))?;
		let reference = DeploymentRef::new(&spec.name, &self.namespace, &created);
		info!(
			"Created deployment at version {:?}",
			reference.resource_version
		);

		Ok(reference)
	}

	/// Sets the replica count and the image of the first container of a
	/// deployment. The deployment is fetched, mutated and written back with the
	/// fetched resource version; if someone else wrote it in between, the whole
	/// cycle is repeated as per the retry policy.
	#[instrument(skip(self), fields(namespace = %self.namespace))]
	pub async fn update(
		&self,
		name: &str,
		desired_replicas: u32,
		desired_image: &str,
	) -> Result<UpdateAck, ApplyError> {
		let fail = |kind: ApplyErrorKind| ApplyError::new(Operation::Update, name, kind);
		let replicas = replica_count(desired_replicas).map_err(fail)?;

		info!("Updating deployment");
		let (updated, attempts) = retry::retry_on(
			&self.retry_policy,
			ApplyErrorKind::is_concurrent_modification,
			move |attempt| self.try_update(name, replicas, desired_image, attempt),
		)
		.await
		.map_err(|RetryError { attempts, error }| {
			if error.is_concurrent_modification() {
				warn!("Giving up after {} conflicting attempt(s)", attempts);
				fail(ApplyErrorKind::ConcurrentModification { attempts })
			} else {
				fail(error)
			}
		})?;
		info!("Updated deployment in {} attempt(s)", attempts);

		Ok(UpdateAck {
			deployment: DeploymentRef::new(name, &self.namespace, &updated),
			attempts,
		})
	}

	/// A single fetch-mutate-submit cycle of [`Self::update`].
	async fn try_update(
		&self,
		name: &str,
		replicas: i32,
		image: &str,
		attempt: u32,
	) -> Result<KubeDeployment, ApplyErrorKind> {
		let mut deployment = self
			.orchestrator
			.get_deployment(&self.namespace, name)
			.await?;
		trace!(
			"Attempt {}: fetched deployment at version {:?}",
			attempt,
			deployment.metadata.resource_version
		);

		let spec = deployment
			.spec
			.as_mut()
			.ok_or_else(|| ApplyErrorKind::Unexpected(format!("deployment `{}` has no spec", name)))?;
		spec.replicas = Some(replicas);
		let container = spec
			.template
			.spec
			.as_mut()
			.and_then(|pod| pod.containers.first_mut())
			.ok_or_else(|| {
				ApplyErrorKind::Unexpected(format!("deployment `{}` has no containers", name))
			})?;
		container.image = Some(image.to_string());

		Ok(self
			.orchestrator
			.replace_deployment(&self.namespace, name, &deployment)
			.await?)
	}

	/// Deletes a deployment. With `cascade`, the deletion only completes once
	/// the dependents (replica sets and pods) are gone; without it, they are
	/// cleaned up in the background. Deleting a deployment that does not exist
	/// is reported as [`ApplyErrorKind::NotFound`] and left to the caller to
	/// tolerate.
	#[instrument(skip(self), fields(namespace = %self.namespace))]
	pub async fn delete(&self, name: &str, cascade: bool) -> Result<(), ApplyError> {
		let propagation = if cascade {
			DeletePropagation::Foreground
		} else {
			DeletePropagation::Background
		};

		info!("Deleting deployment with {:?} propagation", propagation);
		self.orchestrator
			.delete_deployment(&self.namespace, name, propagation)
			.await
			.map_err(|err| ApplyError::new(Operation::Delete, name, err.into()))?;
		info!("Deleted deployment");

		Ok(())
	}

	/// Fetches the current state of a deployment.
	pub async fn get(&self, name: &str) -> Result<KubeDeployment, ApplyError> {
		self.orchestrator
			.get_deployment(&self.namespace, name)
			.await
			.map_err(|err| ApplyError::new(Operation::Get, name, err.into()))
	}

	/// Reports the lifecycle state of a deployment. A missing deployment is
	/// [`LifecycleState::Absent`] rather than an error.
	pub async fn observe(&self, name: &str) -> Result<LifecycleState, ApplyError> {
		match self.orchestrator.get_deployment(&self.namespace, name).await {
			Ok(deployment) => Ok(LifecycleState::of(&deployment)),
			Err(OrchestratorError::NotFound) => Ok(LifecycleState::Absent),
			Err(err) => Err(ApplyError::new(Operation::Get, name, err.into())),
		}
	}
}

/// Builds the deployment resource for a workload spec: the replica count, a
/// single container with its image, port and resource limits, and the `app`
/// label on both the selector and the pod template.
pub fn build_deployment(
	spec: &WorkloadSpec,
	namespace: &str,
) -> Result<KubeDeployment, ApplyErrorKind> {
	let container = &spec.container;

	Ok(KubeDeployment {
		metadata: ObjectMeta {
			name: Some(spec.name.clone()),
			namespace: Some(namespace.to_string()),
			..ObjectMeta::default()
		},
		spec: Some(DeploymentSpec {
			replicas: Some(replica_count(spec.replicas)?),
			selector: LabelSelector {
				match_labels: Some(
					[(APP_LABEL.to_string(), spec.selector_label.clone())].into(),
				),
				match_expressions: None,
			},
			template: PodTemplateSpec {
				metadata: Some(ObjectMeta {
					labels: Some([(APP_LABEL.to_string(), spec.template_label.clone())].into()),
					..ObjectMeta::default()
				}),
				spec: Some(PodSpec {
					containers: vec![Container {
						name: container.name.clone(),
						image: Some(container.image.clone()),
						ports: Some(vec![ContainerPort {
							name: Some(constants::HTTP_PORT_NAME.to_string()),
							protocol: Some(constants::TCP_PROTOCOL.to_string()),
							container_port: container.container_port.into(),
							..ContainerPort::default()
						}]),
						resources: Some(ResourceRequirements {
							limits: Some(
								[
									(
										"memory".to_string(),
										Quantity(container.memory_limit.clone()),
									),
									("cpu".to_string(), Quantity(container.cpu_limit.clone())),
								]
								.into(),
							),
							..ResourceRequirements::default()
						}),
						..Container::default()
					}],
					..PodSpec::default()
				}),
			},
			..DeploymentSpec::default()
		}),
		..KubeDeployment::default()
	})
}

/// Converts a replica count to the width the orchestrator stores, rejecting
/// counts that do not fit.
fn replica_count(replicas: u32) -> Result<i32, ApplyErrorKind> {
	i32::try_from(replicas).map_err(|_| {
		ApplyErrorKind::RejectedBySchema(format!("replica count {} is out of range", replicas))
	})
}
