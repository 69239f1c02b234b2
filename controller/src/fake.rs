use std::{
	collections::BTreeMap,
	sync::{Arc, Mutex, MutexGuard},
};

use k8s_openapi::api::{
	apps::v1::{Deployment as KubeDeployment, DeploymentStatus},
	core::v1::Pod,
};
use kube::core::ObjectMeta;

use crate::client::{DeletePropagation, Orchestrator, OrchestratorError};

/// An in-memory orchestrator. It checks resource versions on write, requires
/// the selector to match the pod template labels, and runs one pod per
/// replica of every stored deployment.
#[derive(Clone, Default)]
pub struct FakeOrchestrator {
	/// The state shared by every clone of the orchestrator.
	state: Arc<Mutex<FakeState>>,
}

/// Everything stored and recorded by a [`FakeOrchestrator`].
#[derive(Default)]
struct FakeState {
	/// The stored deployments, keyed by namespace and name.
	deployments: BTreeMap<(String, String), KubeDeployment>,
	/// The last resource version handed out.
	last_version: u64,
	/// Number of upcoming fetches after which another writer modifies the
	/// fetched deployment.
	concurrent_writes: usize,
	/// Whether every call fails as if the cluster could not be reached.
	unreachable: bool,
	/// Number of deployment fetches served.
	gets: usize,
	/// The resource versions carried by every write-back.
	submitted_versions: Vec<Option<String>>,
	/// The deleted deployments, along with how their pods were collected.
	deletions: Vec<(String, DeletePropagation)>,
}

impl FakeState {
	/// Hands out the next resource version.
	fn next_version(&mut self) -> String {
		self.last_version += 1;
		self.last_version.to_string()
	}

	/// Fails with a transport error while the orchestrator is unreachable.
	fn check_reachable(&self) -> Result<(), OrchestratorError> {
		if self.unreachable {
			Err(OrchestratorError::Transport(
				"tcp connect error: Connection refused (os error 111)".to_string(),
			))
		} else {
			Ok(())
		}
	}
}

impl FakeOrchestrator {
	/// An orchestrator without deployments.
	pub fn new() -> Self {
		Self::default()
	}

	/// Makes another writer modify the deployment right after each of the next
	/// `writes` fetches, so that writing back the fetched copy conflicts.
	pub fn with_concurrent_writers(self, writes: usize) -> Self {
		self.state().concurrent_writes = writes;
		self
	}

	/// Makes every following call fail, or succeed again.
	pub fn set_unreachable(&self, unreachable: bool) {
		self.state().unreachable = unreachable;
	}

	/// Stores a deployment as is, bypassing validation and versioning.
	pub fn insert(&self, namespace: &str, deployment: KubeDeployment) {
		let name = deployment.metadata.name.clone().unwrap_or_default();
		self.state()
			.deployments
			.insert((namespace.to_string(), name), deployment);
	}

	/// The deployment as currently stored, if any.
	pub fn stored(&self, namespace: &str, name: &str) -> Option<KubeDeployment> {
		self.state()
			.deployments
			.get(&(namespace.to_string(), name.to_string()))
			.cloned()
	}

	/// Number of deployment fetches served so far.
	pub fn gets(&self) -> usize {
		self.state().gets
	}

	/// The resource versions carried by every write-back, in order.
	pub fn submitted_versions(&self) -> Vec<Option<String>> {
		self.state().submitted_versions.clone()
	}

	/// Every deletion, in order.
	pub fn deletions(&self) -> Vec<(String, DeletePropagation)> {
		self.state().deletions.clone()
	}

	/// Locks the shared state.
	fn state(&self) -> MutexGuard<'_, FakeState> {
		self.state.lock().unwrap()
	}
}

/// Rejects deployments whose selector does not match their template labels.
fn validate(deployment: &KubeDeployment) -> Result<(), OrchestratorError> {
	let spec = deployment
		.spec
		.as_ref()
		.ok_or_else(|| OrchestratorError::Invalid("spec: Required value".to_string()))?;
	let selector = spec.selector.match_labels.clone().unwrap_or_default();
	let labels = spec
		.template
		.metadata
		.as_ref()
		.and_then(|metadata| metadata.labels.clone())
		.unwrap_or_default();

	if selector.is_empty() || selector.iter().any(|(key, value)| labels.get(key) != Some(value)) {
		return Err(OrchestratorError::Invalid(
			"spec.template.metadata.labels: Invalid value: `selector` does not match template \
			 `labels`"
				.to_string(),
		));
	}
	Ok(())
}

/// Stamps a new version and generation, and rolls the deployment out right
/// away.
fn settle(deployment: &mut KubeDeployment, version: String) {
	let generation = deployment.metadata.generation.unwrap_or(0) + 1;
	let replicas = deployment
		.spec
		.as_ref()
		.and_then(|spec| spec.replicas)
		.unwrap_or(1);

	deployment.metadata.resource_version = Some(version);
	deployment.metadata.generation = Some(generation);
	deployment.status = Some(DeploymentStatus {
		observed_generation: Some(generation),
		replicas: Some(replicas),
		updated_replicas: Some(replicas),
		ready_replicas: Some(replicas),
		available_replicas: Some(replicas),
		..DeploymentStatus::default()
	});
}

impl Orchestrator for FakeOrchestrator {
	async fn create_deployment(
		&self,
		namespace: &str,
		deployment: &KubeDeployment,
	) -> Result<KubeDeployment, OrchestratorError> {
		let mut state = self.state();
		state.check_reachable()?;

		let key = (
			namespace.to_string(),
			deployment.metadata.name.clone().unwrap_or_default(),
		);
		if state.deployments.contains_key(&key) {
			return Err(OrchestratorError::AlreadyExists);
		}
		validate(deployment)?;

		let version = state.next_version();
		let mut created = deployment.clone();
		created.metadata.namespace = Some(namespace.to_string());
		created.metadata.uid = Some(format!("uid-{}", version));
		settle(&mut created, version);

		state.deployments.insert(key, created.clone());
		Ok(created)
	}

	async fn get_deployment(
		&self,
		namespace: &str,
		name: &str,
	) -> Result<KubeDeployment, OrchestratorError> {
		let mut state = self.state();
		state.check_reachable()?;
		state.gets += 1;

		let key = (namespace.to_string(), name.to_string());
		let fetched = state
			.deployments
			.get(&key)
			.cloned()
			.ok_or(OrchestratorError::NotFound)?;

		if state.concurrent_writes > 0 {
			state.concurrent_writes -= 1;
			let version = state.next_version();
			if let Some(stored) = state.deployments.get_mut(&key) {
				stored.metadata.resource_version = Some(version);
			}
		}

		Ok(fetched)
	}

	async fn replace_deployment(
		&self,
		namespace: &str,
		name: &str,
		deployment: &KubeDeployment,
	) -> Result<KubeDeployment, OrchestratorError> {
		let mut state = self.state();
		state.check_reachable()?;
		state
			.submitted_versions
			.push(deployment.metadata.resource_version.clone());

		let key = (namespace.to_string(), name.to_string());
		let stored = state
			.deployments
			.get(&key)
			.ok_or(OrchestratorError::NotFound)?;
		if stored.metadata.resource_version != deployment.metadata.resource_version {
			return Err(OrchestratorError::Conflict(format!(
				"Operation cannot be fulfilled on deployments.apps \"{}\": the object has been \
				 modified; please apply your changes to the latest version and try again",
				name
			)));
		}
		validate(deployment)?;

		let mut replaced = deployment.clone();
		replaced.metadata = ObjectMeta {
			generation: stored.metadata.generation,
			uid: stored.metadata.uid.clone(),
			..deployment.metadata.clone()
		};
		let version = state.next_version();
		settle(&mut replaced, version);

		state.deployments.insert(key, replaced.clone());
		Ok(replaced)
	}

	async fn delete_deployment(
		&self,
		namespace: &str,
		name: &str,
		propagation: DeletePropagation,
	) -> Result<(), OrchestratorError> {
		let mut state = self.state();
		state.check_reachable()?;

		state
			.deployments
			.remove(&(namespace.to_string(), name.to_string()))
			.ok_or(OrchestratorError::NotFound)?;
		state.deletions.push((name.to_string(), propagation));
		Ok(())
	}

	async fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>, OrchestratorError> {
		let state = self.state();
		state.check_reachable()?;

		Ok(state
			.deployments
			.iter()
			.filter(|((deployment_namespace, _), _)| deployment_namespace == namespace)
			.flat_map(|((_, name), deployment)| {
				let replicas = deployment
					.spec
					.as_ref()
					.and_then(|spec| spec.replicas)
					.unwrap_or(1)
					.max(0);
				(0..replicas).map(move |index| Pod {
					metadata: ObjectMeta {
						name: Some(format!("{}-{}", name, index)),
						namespace: Some(namespace.to_string()),
						..ObjectMeta::default()
					},
					..Pod::default()
				})
			})
			.collect())
	}
}
