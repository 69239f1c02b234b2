use std::time::Duration;

use tokio::time::{self, Instant};

use crate::{
	client::Orchestrator,
	error::{ApplyError, Operation},
	prelude::*,
};

/// Reports how many pods are running in a namespace. Every count is a fresh
/// list call against the orchestrator.
pub struct WorkloadProbe<O> {
	/// The orchestrator that pods are listed from.
	orchestrator: O,
}

impl<O> WorkloadProbe<O>
where
	O: Orchestrator,
{
	/// Creates a probe backed by the given orchestrator.
	pub fn new(orchestrator: O) -> Self {
		Self { orchestrator }
	}

	/// The number of pods in the namespace, in any phase. A namespace that
	/// does not exist counts as empty, while a failure to reach the
	/// orchestrator is an error and never a count of zero.
	#[instrument(skip(self))]
	pub async fn count_active(&self, namespace: &str) -> Result<usize, ApplyError> {
		let pods = self
			.orchestrator
			.list_pods(namespace)
			.await
			.map_err(|err| ApplyError::new(Operation::CountActive, namespace, err.into()))?;
		debug!("Found {} pod(s)", pods.len());
		Ok(pods.len())
	}

	/// Polls [`Self::count_active`] until it reports `expected` or the timeout
	/// elapses, and returns the last count observed.
	#[instrument(skip(self))]
	pub async fn wait_for_count(
		&self,
		namespace: &str,
		expected: usize,
		poll_interval: Duration,
		timeout: Duration,
	) -> Result<usize, ApplyError> {
		let deadline = Instant::now().checked_add(timeout);
		loop {
			let count = self.count_active(namespace).await?;
			if count == expected {
				return Ok(count);
			}
			if next_poll_misses(deadline, poll_interval) {
				warn!(
					"Gave up waiting for {} pod(s), last saw {}",
					expected, count
				);
				return Ok(count);
			}
			trace!("Waiting for {} pod(s), currently {}", expected, count);
			time::sleep(poll_interval).await;
		}
	}
}

/// Whether sleeping for another poll interval would overshoot the deadline. A
/// deadline of `None` lies beyond any representable instant and is never
/// reached, while a poll interval too large to represent always overshoots.
pub(crate) fn next_poll_misses(deadline: Option<Instant>, poll_interval: Duration) -> bool {
	let Some(deadline) = deadline else {
		return false;
	};
	Instant::now()
		.checked_add(poll_interval)
		.map_or(true, |next| next > deadline)
}

#[cfg(test)]
mod tests {
	use k8s_openapi::api::apps::v1::{Deployment as KubeDeployment, DeploymentSpec};
	use kube::core::ObjectMeta;

	use super::*;
	use crate::{error::ApplyErrorKind, fake::FakeOrchestrator};

	fn deployment(name: &str, replicas: i32) -> KubeDeployment {
		KubeDeployment {
			metadata: ObjectMeta {
				name: Some(name.to_string()),
				..ObjectMeta::default()
			},
			spec: Some(DeploymentSpec {
				replicas: Some(replicas),
				..DeploymentSpec::default()
			}),
			..KubeDeployment::default()
		}
	}

	#[tokio::test]
	async fn empty_namespaces_count_zero() {
		let probe = WorkloadProbe::new(FakeOrchestrator::new());

		assert_eq!(probe.count_active("default").await.unwrap(), 0);
	}

	#[tokio::test]
	async fn counts_pods_of_the_namespace_only() {
		let fake = FakeOrchestrator::new();
		fake.insert("default", deployment("web", 2));
		fake.insert("default", deployment("worker", 3));
		fake.insert("staging", deployment("web", 4));
		let probe = WorkloadProbe::new(fake);

		assert_eq!(probe.count_active("default").await.unwrap(), 5);
		assert_eq!(probe.count_active("staging").await.unwrap(), 4);
	}

	#[tokio::test]
	async fn unreachable_orchestrators_are_not_zero() {
		let fake = FakeOrchestrator::new();
		fake.set_unreachable(true);
		let probe = WorkloadProbe::new(fake);

		let err = probe.count_active("default").await.unwrap_err();

		assert_eq!(err.operation, Operation::CountActive);
		assert_eq!(err.name, "default");
		assert!(matches!(err.kind, ApplyErrorKind::Unreachable(_)));
	}

	#[tokio::test]
	async fn waits_until_the_count_matches() {
		let fake = FakeOrchestrator::new();
		fake.insert("default", deployment("web", 2));
		let probe = WorkloadProbe::new(fake);

		let count = probe
			.wait_for_count(
				"default",
				2,
				Duration::from_millis(1),
				Duration::from_secs(1),
			)
			.await
			.unwrap();

		assert_eq!(count, 2);
	}

	#[tokio::test]
	async fn returns_the_last_count_on_timeout() {
		let fake = FakeOrchestrator::new();
		fake.insert("default", deployment("web", 1));
		let probe = WorkloadProbe::new(fake);

		let count = probe
			.wait_for_count(
				"default",
				3,
				Duration::from_millis(5),
				Duration::from_millis(20),
			)
			.await
			.unwrap();

		assert_eq!(count, 1);
	}

	#[tokio::test]
	async fn unbounded_timeouts_return_once_the_count_matches() {
		let probe = WorkloadProbe::new(FakeOrchestrator::new());

		let count = probe
			.wait_for_count("default", 0, Duration::from_millis(1), Duration::MAX)
			.await
			.unwrap();

		assert_eq!(count, 0);
	}

	#[tokio::test]
	async fn unbounded_poll_intervals_give_up_after_one_look() {
		let fake = FakeOrchestrator::new();
		fake.insert("default", deployment("web", 1));
		let probe = WorkloadProbe::new(fake);

		let count = probe
			.wait_for_count("default", 3, Duration::MAX, Duration::from_secs(1))
			.await
			.unwrap();

		assert_eq!(count, 1);
	}

	#[test]
	fn deadlines_past_the_end_of_time_are_never_reached() {
		assert!(!next_poll_misses(None, Duration::MAX));
		assert!(!next_poll_misses(None, Duration::ZERO));
	}

	#[test]
	fn oversized_poll_intervals_overshoot_any_deadline() {
		let deadline = Instant::now().checked_add(Duration::from_secs(3600));

		assert!(next_poll_misses(deadline, Duration::MAX));
		assert!(!next_poll_misses(deadline, Duration::from_millis(1)));
	}

	#[tokio::test]
	async fn waiting_propagates_transport_failures() {
		let fake = FakeOrchestrator::new();
		fake.set_unreachable(true);
		let probe = WorkloadProbe::new(fake);

		let err = probe
			.wait_for_count(
				"default",
				0,
				Duration::from_millis(1),
				Duration::from_millis(10),
			)
			.await
			.unwrap_err();

		assert!(matches!(err.kind, ApplyErrorKind::Unreachable(_)));
	}
}
