use std::{
	io::{self, BufRead, Write},
	time::Duration,
};

use models::prelude::*;
use thiserror::Error;
use tokio::time::{self, Instant};

use crate::{
	client::Orchestrator,
	deployment::{DeploymentManager, LifecycleState},
	error::ApplyError,
	prelude::*,
	probe::{self, WorkloadProbe},
	retry::RetryPolicy,
	utils::KubeDeploymentExt,
};

/// The errors that end a session.
#[derive(Debug, Error)]
pub enum SessionError {
	/// An operation against the orchestrator failed
	#[error(transparent)]
	Apply(#[from] ApplyError),
	/// Progress could not be written, or the operator's input could not be
	/// read
	#[error("terminal error: {0}")]
	Io(#[from] io::Error),
}

/// Prints the fields of a loaded workload spec.
pub fn print_spec(spec: &WorkloadSpec, mut output: impl Write) -> io::Result<()> {
	let container = &spec.container;
	writeln!(output, "apiVersion:     {:?}", spec.api_version)?;
	writeln!(output, "kind:           {:?}", spec.kind)?;
	writeln!(output, "name:           {:?}", spec.name)?;
	writeln!(output, "replicas:       {}", spec.replicas)?;
	writeln!(output, "selector label: {:?}", spec.selector_label)?;
	writeln!(output, "template label: {:?}", spec.template_label)?;
	writeln!(
		output,
		"container:      {:?} running {:?} on port {} (cpu {:?}, memory {:?})",
		container.name,
		container.image,
		container.container_port,
		container.cpu_limit,
		container.memory_limit
	)
}

/// What the demo sequence updates the deployment to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemoOptions {
	/// The replica count to update to
	pub replicas: u32,
	/// The image to update the first container to
	pub image: String,
}

impl Default for DemoOptions {
	fn default() -> Self {
		Self {
			replicas: 1,
			image: "nginx:1.13".to_string(),
		}
	}
}

/// Runs the operations of the controller one after the other, printing
/// human-readable progress to `output`. When pausing is enabled, the session
/// waits for the operator to press Return (read from `input`) after every
/// mutating step.
pub struct Session<O, W, R> {
	/// Creates, updates and deletes the deployment
	manager: DeploymentManager<O>,
	/// Counts the pods of the namespace
	probe: WorkloadProbe<O>,
	/// How often the orchestrator is polled while waiting for a change
	poll_interval: Duration,
	/// How long to wait for a change before moving on
	wait_timeout: Duration,
	/// Whether to wait for the operator between steps
	pause: bool,
	/// Where progress is printed
	output: W,
	/// Where the operator's confirmation is read from
	input: R,
}

impl<O, W, R> Session<O, W, R>
where
	O: Orchestrator + Clone,
	W: Write,
	R: BufRead,
{
	/// Creates a session in the default namespace that does not pause.
	pub fn new(orchestrator: O, output: W, input: R) -> Self {
		Self {
			manager: DeploymentManager::new(orchestrator.clone()),
			probe: WorkloadProbe::new(orchestrator),
			poll_interval: Duration::from_millis(500),
			wait_timeout: Duration::from_secs(60),
			pause: false,
			output,
			input,
		}
	}

	/// Sets the namespace the deployment is managed in.
	pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
		self.manager = self.manager.with_namespace(namespace);
		self
	}

	/// Sets how updates are retried when they conflict.
	pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
		self.manager = self.manager.with_retry_policy(retry_policy);
		self
	}

	/// Sets how often, and for how long, the session polls while waiting for
	/// the orchestrator to catch up.
	pub fn with_wait(mut self, poll_interval: Duration, wait_timeout: Duration) -> Self {
		self.poll_interval = poll_interval;
		self.wait_timeout = wait_timeout;
		self
	}

	/// Sets whether the session waits for the operator after every mutating
	/// step.
	pub fn with_pause(mut self, pause: bool) -> Self {
		self.pause = pause;
		self
	}

	/// Consumes the session, returning its output.
	pub fn into_output(self) -> W {
		self.output
	}

	/// Creates the deployment described by the spec.
	pub async fn apply(&mut self, spec: &WorkloadSpec) -> Result<(), SessionError> {
		writeln!(self.output, "Creating deployment...")?;
		let reference = self.manager.create(spec).await?;
		writeln!(self.output, "Created deployment {:?}.", reference.name)?;
		self.prompt()
	}

	/// Updates the replica count and image of a deployment.
	pub async fn update(
		&mut self,
		name: &str,
		replicas: u32,
		image: &str,
	) -> Result<(), SessionError> {
		writeln!(self.output, "Updating deployment...")?;
		let ack = self.manager.update(name, replicas, image).await?;
		writeln!(
			self.output,
			"Updated deployment {:?} after {} attempt(s).",
			ack.deployment.name, ack.attempts
		)?;
		self.prompt()
	}

	/// Deletes a deployment, along with its dependents when `cascade` is set.
	pub async fn delete(&mut self, name: &str, cascade: bool) -> Result<(), SessionError> {
		writeln!(self.output, "Deleting deployment...")?;
		self.manager.delete(name, cascade).await?;
		writeln!(self.output, "Deleted deployment.")?;
		self.prompt()
	}

	/// Prints the number of pods in a namespace, the session's own namespace
	/// if none is given.
	pub async fn pods(&mut self, namespace: Option<&str>) -> Result<usize, SessionError> {
		let namespace = namespace
			.unwrap_or(self.manager.namespace())
			.to_string();
		let count = self.probe.count_active(&namespace).await?;
		writeln!(
			self.output,
			"There are {} pod(s) in namespace `{}`.",
			count, namespace
		)?;
		Ok(count)
	}

	/// Prints the lifecycle state of a deployment, along with its replica
	/// count and image when it exists.
	pub async fn status(&mut self, name: &str) -> Result<LifecycleState, SessionError> {
		let deployment = match self.manager.get(name).await {
			Ok(deployment) => deployment,
			Err(err) if err.is_not_found() => {
				let state = LifecycleState::Absent;
				writeln!(self.output, "Deployment {:?} is {}.", name, state)?;
				return Ok(state);
			}
			Err(err) => return Err(err.into()),
		};

		let state = LifecycleState::of(&deployment);
		writeln!(
			self.output,
			"Deployment {:?} is {}: {} replica(s) of {:?}.",
			name,
			state,
			deployment.replicas().unwrap_or(1),
			deployment.image().unwrap_or_default()
		)?;
		Ok(state)
	}

	/// Runs the whole lifecycle of the deployment described by the spec:
	/// creates it, waits for its pods, updates it, and deletes it again.
	#[instrument(skip_all, fields(name = %spec.name))]
	pub async fn demo(
		&mut self,
		spec: &WorkloadSpec,
		options: &DemoOptions,
	) -> Result<(), SessionError> {
		let namespace = self.manager.namespace().to_string();
		let baseline = self.pods(None).await?;

		self.apply(spec).await?;
		self.wait_for_pods(&namespace, baseline + spec.replicas as usize)
			.await?;

		self.update(&spec.name, options.replicas, &options.image)
			.await?;
		let deployment = self.manager.get(&spec.name).await?;
		writeln!(
			self.output,
			"Deployment {:?} now runs {} replica(s) of {:?}.",
			spec.name,
			deployment.replicas().unwrap_or(1),
			deployment.image().unwrap_or_default()
		)?;
		self.wait_for_pods(&namespace, baseline + options.replicas as usize)
			.await?;

		self.delete(&spec.name, true).await?;
		self.wait_until_absent(&spec.name).await
	}

	/// Waits for the namespace to hold `expected` pods and prints the count it
	/// settled on.
	async fn wait_for_pods(
		&mut self,
		namespace: &str,
		expected: usize,
	) -> Result<(), SessionError> {
		let count = self
			.probe
			.wait_for_count(namespace, expected, self.poll_interval, self.wait_timeout)
			.await?;
		if count == expected {
			writeln!(
				self.output,
				"There are {} pod(s) in namespace `{}`.",
				count, namespace
			)?;
		} else {
			writeln!(
				self.output,
				"Expected {} pod(s) in namespace `{}`, but there are {}.",
				expected, namespace, count
			)?;
		}
		Ok(())
	}

	/// Polls the deployment until it is gone or the wait times out.
	async fn wait_until_absent(&mut self, name: &str) -> Result<(), SessionError> {
		let deadline = Instant::now().checked_add(self.wait_timeout);
		loop {
			let state = self.manager.observe(name).await?;
			if state == LifecycleState::Absent {
				writeln!(self.output, "Deployment {:?} is gone.", name)?;
				return Ok(());
			}
			if probe::next_poll_misses(deadline, self.poll_interval) {
				writeln!(self.output, "Deployment {:?} is still {}.", name, state)?;
				return Ok(());
			}
			debug!("Deployment is {}, waiting for it to go away", state);
			time::sleep(self.poll_interval).await;
		}
	}

	/// Blocks on a line of input when the session pauses between steps.
	fn prompt(&mut self) -> Result<(), SessionError> {
		if !self.pause {
			return Ok(());
		}

		write!(self.output, "-> Press Return key to continue.")?;
		self.output.flush()?;
		let mut line = String::new();
		self.input.read_line(&mut line)?;
		writeln!(self.output)?;
		Ok(())
	}
}
