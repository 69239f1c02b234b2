use std::{
	fmt::{Display, Formatter},
	io,
	path::{Path, PathBuf},
	time::Duration,
};

use config::{Config, ConfigError, Environment, File};
use kube::{
	config::{InferConfigError, KubeConfigOptions, Kubeconfig, KubeconfigError},
	Client,
	Config as KubeConfig,
};
use models::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{dispatcher::SetGlobalDefaultError, level_filters::LevelFilter, Dispatch};
use tracing_subscriber::{
	fmt::{format::FmtSpan, Layer as FmtLayer},
	layer::SubscriberExt,
	Layer,
};

use crate::prelude::*;

/// The settings of the controller. They are read from an optional
/// `deployctl.{yaml,toml,json}` file (or the file given with `--config`),
/// then from `DEPLOYCTL__*` environment variables, and finally from the
/// command line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerSettings {
	/// The namespace deployments are managed in
	pub namespace: String,
	/// The kubeconfig file to connect with. The configuration is inferred from
	/// the environment when not set.
	pub kubeconfig: Option<PathBuf>,
	/// The kubeconfig context to use, instead of the current one
	pub context: Option<String>,
	/// How long to wait for a connection to the cluster, in seconds
	pub connect_timeout_secs: u64,
	/// How long to wait for a response from the cluster, in seconds
	pub read_timeout_secs: u64,
	/// How updates are retried when they conflict
	pub retry: RetrySettings,
	/// How the pod count is polled while waiting for a rollout
	pub probe: ProbeSettings,
	/// The environment the controller is running in. This decides the default
	/// log level.
	pub environment: RunningEnvironment,
}

impl ControllerSettings {
	/// Reads the settings, with the given command line arguments taking
	/// precedence over every other source.
	pub fn parse(global_args: &GlobalArgs) -> Result<Self, ConfigError> {
		Self::parse_with(
			global_args,
			Environment::with_prefix("DEPLOYCTL")
				.separator("__")
				.try_parsing(true),
		)
	}

	/// Reads the settings with the given source of environment variables.
	fn parse_with(
		global_args: &GlobalArgs,
		environment: Environment,
	) -> Result<Self, ConfigError> {
		let builder = Config::builder()
			.set_default("namespace", constants::DEFAULT_NAMESPACE)?
			.set_default("connect_timeout_secs", 10_i64)?
			.set_default("read_timeout_secs", 30_i64)?
			.set_default("retry.attempts", 5_i64)?
			.set_default("retry.backoff_millis", 10_i64)?
			.set_default("retry.factor", 1.0)?
			.set_default("retry.jitter", 0.1)?
			.set_default("probe.poll_interval_millis", 500_i64)?
			.set_default("probe.wait_timeout_secs", 60_i64)?
			.set_default(
				"environment",
				if cfg!(debug_assertions) {
					"development"
				} else {
					"production"
				},
			)?;

		match &global_args.config {
			Some(path) => builder.add_source(File::from(path.as_path()).required(true)),
			None => builder.add_source(File::with_name("deployctl").required(false)),
		}
		.add_source(environment)
		.set_override_option("namespace", global_args.namespace.clone())?
		.set_override_option(
			"kubeconfig",
			global_args
				.kubeconfig
				.as_ref()
				.map(|path| path.display().to_string()),
		)?
		.build()?
		.try_deserialize::<Self>()
		.and_then(|settings| {
			settings.retry.validate()?;
			Ok(settings)
		})
	}
}

/// How updates are retried when they conflict with a concurrent writer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
	/// The maximum number of attempts
	pub attempts: u32,
	/// The delay before the second attempt, in milliseconds
	pub backoff_millis: u64,
	/// The factor the delay grows by after every attempt
	pub factor: f64,
	/// The upper bound of the random extra delay, as a fraction of the delay
	pub jitter: f64,
}

impl RetrySettings {
	/// The retry policy described by these settings.
	pub fn policy(&self) -> RetryPolicy {
		RetryPolicy {
			attempts: self.attempts,
			backoff: Duration::from_millis(self.backoff_millis),
			factor: self.factor,
			jitter: self.jitter,
		}
	}

	/// Rejects growth factors that are negative or not finite, and jitter
	/// outside of `0..=1`.
	fn validate(&self) -> Result<(), ConfigError> {
		if !self.factor.is_finite() || self.factor < 0.0 {
			return Err(ConfigError::Message(format!(
				"retry.factor must be a finite, non-negative number, got {}",
				self.factor
			)));
		}
		if !(0.0..=1.0).contains(&self.jitter) {
			return Err(ConfigError::Message(format!(
				"retry.jitter must be between 0 and 1, got {}",
				self.jitter
			)));
		}
		Ok(())
	}
}

/// How the pod count is polled while waiting for a rollout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeSettings {
	/// The time between two polls, in milliseconds
	pub poll_interval_millis: u64,
	/// How long to wait before moving on, in seconds
	pub wait_timeout_secs: u64,
}

impl ProbeSettings {
	/// The time between two polls.
	pub fn poll_interval(&self) -> Duration {
		Duration::from_millis(self.poll_interval_millis)
	}

	/// How long to wait before moving on.
	pub fn wait_timeout(&self) -> Duration {
		Duration::from_secs(self.wait_timeout_secs)
	}
}

/// The environment the application is running in
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum RunningEnvironment {
	/// The application is running in development mode
	Development,
	/// The application is running in production mode
	Production,
}

impl Display for RunningEnvironment {
	fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
		write!(
			formatter,
			"{}",
			match self {
				RunningEnvironment::Development => "Development",
				RunningEnvironment::Production => "Production",
			}
		)
	}
}

/// The errors that can stop the controller before or while running a command.
#[derive(Debug, Error)]
pub enum AppError {
	/// The settings could not be read
	#[error("invalid settings: {0}")]
	Settings(#[from] ConfigError),
	/// The global subscriber could not be installed
	#[error("failed to set up logging: {0}")]
	Logging(#[from] SetGlobalDefaultError),
	/// The kubeconfig file could not be read
	#[error("failed to load kubeconfig: {0}")]
	Kubeconfig(#[from] KubeconfigError),
	/// No cluster configuration could be found in the environment
	#[error("failed to infer the cluster configuration: {0}")]
	InferConfig(#[from] InferConfigError),
	/// The Kubernetes client could not be created
	#[error("failed to create the Kubernetes client: {0}")]
	Client(#[from] kube::Error),
	/// The workload document could not be read
	#[error("failed to read `{}`: {source}", path.display())]
	ReadSpec {
		/// The path of the document
		path: PathBuf,
		/// The underlying error
		source: io::Error,
	},
	/// The workload document could not be decoded
	#[error("failed to decode `{}`: {source}", path.display())]
	Decode {
		/// The path of the document
		path: PathBuf,
		/// The underlying error
		source: DecodeError,
	},
	/// A step of the session failed
	#[error(transparent)]
	Session(#[from] SessionError),
}

/// The level events are logged at, given the environment and the number of
/// `-v` flags.
pub fn log_level(environment: RunningEnvironment, verbosity: u8) -> LevelFilter {
	let base: u8 = match environment {
		RunningEnvironment::Development => 1,
		RunningEnvironment::Production => 0,
	};
	match base.saturating_add(verbosity) {
		0 => LevelFilter::INFO,
		1 => LevelFilter::DEBUG,
		_ => LevelFilter::TRACE,
	}
}

/// Sets up the global default subscriber, logging to stderr so that the
/// progress printed on stdout stays readable.
pub fn init_tracing(environment: RunningEnvironment, verbosity: u8) -> Result<(), AppError> {
	tracing::dispatcher::set_global_default(Dispatch::new(
		tracing_subscriber::registry().with(
			FmtLayer::new()
				.with_writer(io::stderr)
				.with_span_events(FmtSpan::NONE)
				.event_format(
					tracing_subscriber::fmt::format()
						.with_ansi(true)
						.with_file(false)
						.without_time()
						.compact(),
				)
				.with_filter(
					tracing_subscriber::filter::Targets::new()
						.with_target(env!("CARGO_PKG_NAME"), LevelFilter::TRACE)
						.with_target("models", LevelFilter::TRACE)
						.with_target("kube", LevelFilter::WARN),
				)
				.with_filter(log_level(environment, verbosity)),
		),
	))?;
	Ok(())
}

/// Connects to the cluster described by the settings. An explicit kubeconfig
/// file wins, then an explicit context of the default kubeconfig, and
/// otherwise the configuration is inferred from the environment (the default
/// kubeconfig or the in-cluster service account).
pub async fn create_client(settings: &ControllerSettings) -> Result<Client, AppError> {
	let options = KubeConfigOptions {
		context: settings.context.clone(),
		..KubeConfigOptions::default()
	};
	let mut config = match (&settings.kubeconfig, &settings.context) {
		(Some(path), _) => {
			debug!("Loading kubeconfig from `{}`", path.display());
			KubeConfig::from_custom_kubeconfig(Kubeconfig::read_from(path)?, &options).await?
		}
		(None, Some(context)) => {
			debug!("Loading context `{}` of the default kubeconfig", context);
			KubeConfig::from_kubeconfig(&options).await?
		}
		(None, None) => KubeConfig::infer().await?,
	};
	config.connect_timeout = Some(Duration::from_secs(settings.connect_timeout_secs));
	config.read_timeout = Some(Duration::from_secs(settings.read_timeout_secs));
	info!("Connecting to cluster at {}", config.cluster_url);

	Ok(Client::try_from(config)?)
}

/// Reads and decodes a workload document.
pub async fn load_spec(path: &Path) -> Result<WorkloadSpec, AppError> {
	let bytes = tokio::fs::read(path).await.map_err(|source| AppError::ReadSpec {
		path: path.to_path_buf(),
		source,
	})?;
	WorkloadSpec::load(&bytes).map_err(|source| AppError::Decode {
		path: path.to_path_buf(),
		source,
	})
}
