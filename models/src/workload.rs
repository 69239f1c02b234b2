use std::str::FromStr;

use serde::Deserialize;

use crate::DecodeError;

/// The label key used to bind the replica selector to the pod template.
pub const APP_LABEL: &str = "app";

/// The decoded, flattened description of a deployment. This is constructed
/// once per load and is never written back to the document it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadSpec {
	/// The `apiVersion` tag of the document. Read, but not validated.
	pub api_version: String,
	/// The `kind` tag of the document. Read, but not validated.
	pub kind: String,
	/// The name of the deployment resource.
	pub name: String,
	/// The desired number of replicas.
	pub replicas: u32,
	/// The value of the `app` label the replica selector matches on.
	pub selector_label: String,
	/// The value of the `app` label applied to the pod template. The
	/// orchestrator will reject the deployment if this does not match
	/// [`Self::selector_label`].
	pub template_label: String,
	/// The single container run by every replica.
	pub container: ContainerSpec,
}

/// The single container of a [`WorkloadSpec`]. Multi-container pods are not
/// modeled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
	/// The name of the container within the pod
	pub name: String,
	/// The image (including the tag) the container runs
	pub image: String,
	/// The CPU limit, as an orchestrator quantity (e.g. `500m`)
	pub cpu_limit: String,
	/// The memory limit, as an orchestrator quantity (e.g. `128Mi`)
	pub memory_limit: String,
	/// The port the container listens on
	pub container_port: u16,
}

impl WorkloadSpec {
	/// Decodes a workload document from a byte buffer. Only the fields the
	/// controller needs are read, anything else in the document is ignored.
	/// Malformed documents, missing paths and mistyped fields are all reported
	/// as a [`DecodeError`].
	pub fn load(bytes: &[u8]) -> Result<Self, DecodeError> {
		serde_yaml::from_slice::<DeploymentDocument>(bytes)?.try_into()
	}

	/// Whether the selector and the pod template carry the same label value.
	pub fn labels_match(&self) -> bool {
		self.selector_label == self.template_label
	}
}

impl FromStr for WorkloadSpec {
	type Err = DecodeError;

	fn from_str(document: &str) -> Result<Self, Self::Err> {
		Self::load(document.as_bytes())
	}
}

impl TryFrom<DeploymentDocument> for WorkloadSpec {
	type Error = DecodeError;

	fn try_from(document: DeploymentDocument) -> Result<Self, Self::Error> {
		let DeploymentDocument {
			api_version,
			kind,
			metadata,
			spec,
		} = document;

		// The documented layout keeps the pod spec at `spec.spec`. Fall back to
		// the layout the orchestrator itself uses.
		let pod_spec = spec
			.spec
			.or(spec.template.spec)
			.ok_or(DecodeError::MissingField("spec.spec.containers"))?;
		let container = pod_spec
			.containers
			.into_iter()
			.next()
			.ok_or(DecodeError::MissingField("spec.spec.containers[0]"))?;
		let port = container
			.ports
			.into_iter()
			.next()
			.ok_or(DecodeError::MissingField(
				"spec.spec.containers[0].ports[0]",
			))?;

		Ok(Self {
			api_version,
			kind,
			name: metadata.name,
			replicas: spec.replicas,
			selector_label: spec.selector.match_labels.app,
			template_label: spec.template.metadata.labels.app,
			container: ContainerSpec {
				name: container.name,
				image: container.image,
				cpu_limit: container.resources.limits.cpu,
				memory_limit: container.resources.limits.memory,
				container_port: port.container_port,
			},
		})
	}
}

/// The workload document as it is laid out on disk. Every field here is public
/// so that the decoder can populate all of it, nested labels included.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentDocument {
	/// The document's `apiVersion` tag
	pub api_version: String,
	/// The document's `kind` tag
	pub kind: String,
	/// `metadata`
	pub metadata: DocumentMetadata,
	/// `spec`
	pub spec: DocumentSpec,
}

/// `metadata` of a [`DeploymentDocument`]
#[derive(Debug, Clone, Deserialize)]
pub struct DocumentMetadata {
	/// The name of the resource
	pub name: String,
}

/// `spec` of a [`DeploymentDocument`]
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSpec {
	/// The desired number of replicas
	pub replicas: u32,
	/// `spec.selector`
	pub selector: DocumentSelector,
	/// `spec.template`
	pub template: DocumentTemplate,
	/// `spec.spec`, holding the containers
	#[serde(default)]
	pub spec: Option<DocumentPodSpec>,
}

/// `spec.selector` of a [`DeploymentDocument`]
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSelector {
	/// `spec.selector.matchLabels`
	pub match_labels: AppLabels,
}

/// `spec.template` of a [`DeploymentDocument`]
#[derive(Debug, Clone, Deserialize)]
pub struct DocumentTemplate {
	/// `spec.template.metadata`
	pub metadata: DocumentTemplateMetadata,
	/// `spec.template.spec`, where the orchestrator's own layout keeps the
	/// containers
	#[serde(default)]
	pub spec: Option<DocumentPodSpec>,
}

/// `spec.template.metadata` of a [`DeploymentDocument`]
#[derive(Debug, Clone, Deserialize)]
pub struct DocumentTemplateMetadata {
	/// `spec.template.metadata.labels`
	pub labels: AppLabels,
}

/// A label map, of which only the `app` key is read.
#[derive(Debug, Clone, Deserialize)]
pub struct AppLabels {
	/// The value of the `app` label
	pub app: String,
}

/// The pod spec holding the containers
#[derive(Debug, Clone, Deserialize)]
pub struct DocumentPodSpec {
	/// The containers of the pod. Only the first one is read.
	pub containers: Vec<DocumentContainer>,
}

/// A single container entry
#[derive(Debug, Clone, Deserialize)]
pub struct DocumentContainer {
	/// The name of the container
	pub name: String,
	/// The image of the container
	pub image: String,
	/// The resource limits of the container
	pub resources: DocumentResources,
	/// The exposed ports. Only the first one is read.
	pub ports: Vec<DocumentPort>,
}

/// `resources` of a [`DocumentContainer`]
#[derive(Debug, Clone, Deserialize)]
pub struct DocumentResources {
	/// `resources.limits`
	pub limits: DocumentLimits,
}

/// `resources.limits` of a [`DocumentContainer`]
#[derive(Debug, Clone, Deserialize)]
pub struct DocumentLimits {
	/// The memory limit
	pub memory: String,
	/// The CPU limit
	pub cpu: String,
}

/// A single port entry of a [`DocumentContainer`]
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentPort {
	/// The port the container listens on
	pub container_port: u16,
}
