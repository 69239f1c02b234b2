use std::{future::Future, time::Duration};

use rand::Rng;

use crate::prelude::*;

/// How many times, and how far apart, an operation is attempted when it fails
/// with a retriable error. The defaults are 5 attempts, 10ms apart, with up
/// to 10% of jitter.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
	/// The maximum number of attempts, including the first one. A value of 0
	/// is treated as 1.
	pub attempts: u32,
	/// The delay before the second attempt.
	pub backoff: Duration,
	/// The factor the delay is multiplied by after every attempt.
	pub factor: f64,
	/// The upper bound of the random extra delay, as a fraction of the delay.
	/// Values outside of `0..=1` are clamped into it.
	pub jitter: f64,
}

impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			attempts: 5,
			backoff: Duration::from_millis(10),
			factor: 1.0,
			jitter: 0.1,
		}
	}
}

impl RetryPolicy {
	/// A policy that retries up to `attempts` times without waiting in
	/// between.
	pub fn immediate(attempts: u32) -> Self {
		Self {
			attempts,
			backoff: Duration::ZERO,
			factor: 1.0,
			jitter: 0.0,
		}
	}

	/// The delay to wait after the given (1-based) failed attempt, before the
	/// next one.
	pub fn delay_for(&self, attempt: u32) -> Duration {
		let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
		let delay = scale(self.backoff, self.factor.max(0.0).powi(exponent));
		let jitter = if self.jitter.is_nan() {
			0.0
		} else {
			self.jitter.clamp(0.0, 1.0)
		};
		if jitter > 0.0 && !delay.is_zero() {
			delay.saturating_add(scale(delay, rand::thread_rng().gen_range(0.0..=jitter)))
		} else {
			delay
		}
	}
}

/// Multiplies a duration, saturating instead of panicking when the result does
/// not fit.
fn scale(duration: Duration, multiplier: f64) -> Duration {
	if duration.is_zero() || multiplier.is_nan() {
		return Duration::ZERO;
	}
	Duration::try_from_secs_f64(duration.as_secs_f64() * multiplier).unwrap_or(Duration::MAX)
}

/// The error that made [`retry_on`] stop, along with how many attempts were
/// made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryError<E> {
	/// The number of attempts made, including the one that failed last.
	pub attempts: u32,
	/// The error of the last attempt.
	pub error: E,
}

/// Runs `operation` until it succeeds, fails with an error `retriable` does not
/// accept, or the policy runs out of attempts. The operation is given the
/// (1-based) number of the attempt, and must redo all of its work on every
/// attempt. On success, the value is returned along with the number of
/// attempts it took.
pub async fn retry_on<T, E, F, Fut, P>(
	policy: &RetryPolicy,
	retriable: P,
	mut operation: F,
) -> Result<(T, u32), RetryError<E>>
where
	F: FnMut(u32) -> Fut,
	Fut: Future<Output = Result<T, E>>,
	P: Fn(&E) -> bool,
{
	let max_attempts = policy.attempts.max(1);
	let mut attempt = 1;
	loop {
		match operation(attempt).await {
			Ok(value) => return Ok((value, attempt)),
			Err(error) if attempt < max_attempts && retriable(&error) => {
				let delay = policy.delay_for(attempt);
				debug!(
					"Attempt {}/{} failed with a retriable error. Retrying in {:?}",
					attempt, max_attempts, delay
				);
				if !delay.is_zero() {
					tokio::time::sleep(delay).await;
				}
				attempt += 1;
			}
			Err(error) => {
				return Err(RetryError {
					attempts: attempt,
					error,
				})
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use std::cell::Cell;

	use super::*;

	#[derive(Debug, PartialEq, Eq)]
	enum TestError {
		Conflict,
		Fatal,
	}

	fn is_conflict(err: &TestError) -> bool {
		*err == TestError::Conflict
	}

	#[tokio::test]
	async fn succeeds_after_transient_conflicts() {
		let calls = Cell::new(0);

		let result = retry_on(&RetryPolicy::immediate(5), is_conflict, |attempt| {
			calls.set(calls.get() + 1);
			async move {
				if attempt < 3 {
					Err(TestError::Conflict)
				} else {
					Ok(attempt * 10)
				}
			}
		})
		.await;

		assert_eq!(result, Ok((30, 3)));
		assert_eq!(calls.get(), 3);
	}

	#[tokio::test]
	async fn gives_up_once_attempts_run_out() {
		let calls = Cell::new(0);

		let result = retry_on(&RetryPolicy::immediate(5), is_conflict, |_| {
			calls.set(calls.get() + 1);
			async { Err::<(), _>(TestError::Conflict) }
		})
		.await;

		assert_eq!(
			result,
			Err(RetryError {
				attempts: 5,
				error: TestError::Conflict,
			})
		);
		assert_eq!(calls.get(), 5);
	}

	#[tokio::test]
	async fn does_not_retry_other_errors() {
		let calls = Cell::new(0);

		let result = retry_on(&RetryPolicy::immediate(5), is_conflict, |_| {
			calls.set(calls.get() + 1);
			async { Err::<(), _>(TestError::Fatal) }
		})
		.await;

		assert_eq!(
			result,
			Err(RetryError {
				attempts: 1,
				error: TestError::Fatal,
			})
		);
		assert_eq!(calls.get(), 1);
	}

	#[tokio::test]
	async fn zero_attempts_still_runs_once() {
		let result = retry_on(&RetryPolicy::immediate(0), is_conflict, |attempt| async move {
			Ok::<_, TestError>(attempt)
		})
		.await;

		assert_eq!(result, Ok((1, 1)));
	}

	#[tokio::test]
	async fn waits_between_attempts() {
		let policy = RetryPolicy {
			attempts: 3,
			backoff: Duration::from_millis(5),
			factor: 1.0,
			jitter: 0.0,
		};
		let started = tokio::time::Instant::now();

		let result = retry_on(&policy, is_conflict, |_| async {
			Err::<(), _>(TestError::Conflict)
		})
		.await;

		assert_eq!(result.unwrap_err().attempts, 3);
		assert!(started.elapsed() >= Duration::from_millis(10));
	}

	#[test]
	fn delays_grow_by_the_factor() {
		let policy = RetryPolicy {
			attempts: 4,
			backoff: Duration::from_millis(10),
			factor: 2.0,
			jitter: 0.0,
		};

		assert_eq!(policy.delay_for(1), Duration::from_millis(10));
		assert_eq!(policy.delay_for(2), Duration::from_millis(20));
		assert_eq!(policy.delay_for(3), Duration::from_millis(40));
	}

	#[test]
	fn jitter_stays_within_bounds() {
		let policy = RetryPolicy::default();

		for attempt in 1..=policy.attempts {
			let delay = policy.delay_for(attempt);
			assert!(delay >= Duration::from_millis(10));
			assert!(delay <= Duration::from_millis(11));
		}
	}

	#[test]
	fn out_of_range_jitter_is_clamped() {
		let backoff = Duration::from_millis(10);
		for jitter in [f64::INFINITY, f64::NAN, 7.5, -1.0] {
			let policy = RetryPolicy {
				jitter,
				..RetryPolicy::default()
			};

			let delay = policy.delay_for(1);

			assert!(delay >= backoff, "jitter {} shortened the delay", jitter);
			assert!(delay <= backoff * 2, "jitter {} exceeded the delay", jitter);
		}
	}

	#[test]
	fn unbounded_factors_saturate() {
		let policy = RetryPolicy {
			factor: f64::INFINITY,
			jitter: 0.0,
			..RetryPolicy::default()
		};

		assert_eq!(policy.delay_for(1), Duration::from_millis(10));
		assert_eq!(policy.delay_for(2), Duration::MAX);

		let policy = RetryPolicy {
			factor: f64::NAN,
			jitter: 0.0,
			..RetryPolicy::default()
		};
		assert_eq!(policy.delay_for(2), Duration::ZERO);
	}

	#[test]
	fn immediate_policies_never_wait() {
		assert_eq!(RetryPolicy::immediate(3).delay_for(2), Duration::ZERO);
	}
}
