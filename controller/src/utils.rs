use k8s_openapi::api::apps::v1::Deployment as KubeDeployment;

/// Constants used across the controller
pub mod constants {
	/// The namespace deployments are managed in when none is configured
	pub const DEFAULT_NAMESPACE: &str = "default";
	/// The name given to the container port of a deployment
	pub const HTTP_PORT_NAME: &str = "http";
	/// The protocol of the container port of a deployment
	pub const TCP_PROTOCOL: &str = "TCP";
}

/// Shortcuts for reading the fields of a deployment that the controller
/// manages.
pub trait KubeDeploymentExt {
	/// The desired replica count, if set.
	fn replicas(&self) -> Option<i32>;
	/// The image of the first container, if any.
	fn image(&self) -> Option<&str>;
}

impl KubeDeploymentExt for KubeDeployment {
	fn replicas(&self) -> Option<i32> {
		self.spec.as_ref().and_then(|spec| spec.replicas)
	}

	fn image(&self) -> Option<&str> {
		self.spec
			.as_ref()
			.and_then(|spec| spec.template.spec.as_ref())
			.and_then(|pod| pod.containers.first())
			.and_then(|container| container.image.as_deref())
	}
}
