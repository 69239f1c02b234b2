use std::{io, path::PathBuf};

use clap::{ArgAction, Args, Parser, Subcommand};

use crate::{
	app::{self, AppError, ControllerSettings},
	prelude::*,
};

/// A list of all the arguments that can be passed to the CLI.
#[derive(Debug, Clone, Parser)]
#[command(author, version, about)]
pub struct AppArgs {
	/// All global arguments that can be used across all commands.
	#[command(flatten)]
	pub global_args: GlobalArgs,
	/// A command that is called on the CLI.
	#[command(subcommand)]
	pub command: GlobalCommands,
}

/// A global list of all the arguments that can be passed to the CLI.
#[derive(Debug, Clone, Args)]
pub struct GlobalArgs {
	/// The settings file to read, instead of `deployctl.{yaml,toml,json}` in
	/// the working directory.
	#[arg(long, global = true)]
	pub config: Option<PathBuf>,
	/// The namespace to manage deployments in. Defaults to `default`.
	#[arg(short = 'n', long, global = true)]
	pub namespace: Option<String>,
	/// The kubeconfig file to connect with, instead of the inferred
	/// configuration.
	#[arg(long, global = true)]
	pub kubeconfig: Option<PathBuf>,
	/// Log more details. Can be repeated.
	#[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
	pub verbosity: u8,
}

/// A list of all the commands that can be called on the CLI.
#[derive(Debug, Clone, Subcommand)]
#[command(rename_all = "kebab-case")]
pub enum GlobalCommands {
	/// Print the fields of a workload document.
	Show(SpecArgs),
	/// Create a deployment from a workload document.
	#[command(alias = "create")]
	Apply(SpecArgs),
	/// Set the replica count and image of a deployment.
	Update(UpdateArgs),
	/// Delete a deployment, along with its pods.
	Delete(DeleteArgs),
	/// Count the pods in a namespace.
	Pods(PodsArgs),
	/// Print the lifecycle state of a deployment.
	Status(NameArgs),
	/// Create, update and delete the deployment of a workload document, one
	/// step after the other.
	Demo(DemoArgs),
}

/// The arguments of commands that read a workload document.
#[derive(Debug, Clone, Args)]
pub struct SpecArgs {
	/// The workload document to read.
	#[arg(short = 'f', long, default_value = "deploy.yaml")]
	pub file: PathBuf,
}

/// The arguments of commands that act on a deployment by name.
#[derive(Debug, Clone, Args)]
pub struct NameArgs {
	/// The name of the deployment.
	pub name: String,
}

/// The arguments of the update command.
#[derive(Debug, Clone, Args)]
pub struct UpdateArgs {
	/// The name of the deployment.
	pub name: String,
	/// The replica count to set.
	#[arg(long)]
	pub replicas: u32,
	/// The image to set on the first container.
	#[arg(long)]
	pub image: String,
}

/// The arguments of the delete command.
#[derive(Debug, Clone, Args)]
pub struct DeleteArgs {
	/// The name of the deployment.
	pub name: String,
	/// Remove the deployment right away and leave its pods to be cleaned up
	/// in the background.
	#[arg(long)]
	pub orphan_children: bool,
}

/// The arguments of the pods command.
#[derive(Debug, Clone, Args)]
pub struct PodsArgs {
	/// The namespace to count pods in. Defaults to the configured namespace.
	#[arg(value_name = "NAMESPACE")]
	pub target_namespace: Option<String>,
}

/// The arguments of the demo command.
#[derive(Debug, Clone, Args)]
pub struct DemoArgs {
	/// The workload document to run the demo with.
	#[command(flatten)]
	pub spec: SpecArgs,
	/// Wait for Return to be pressed after every step.
	#[arg(long)]
	pub pause: bool,
	/// The replica count to update the deployment to.
	#[arg(long, default_value_t = 1)]
	pub replicas: u32,
	/// The image to update the deployment to.
	#[arg(long, default_value = "nginx:1.13")]
	pub image: String,
}

impl GlobalCommands {
	/// Runs the command, printing its progress to stdout.
	pub async fn execute(self, global_args: &GlobalArgs) -> Result<(), AppError> {
		let settings = ControllerSettings::parse(global_args)?;
		app::init_tracing(settings.environment, global_args.verbosity)?;
		debug!("Running in {} mode", settings.environment);

		if let Self::Show(args) = &self {
			let spec = app::load_spec(&args.file).await?;
			print_spec(&spec, io::stdout().lock()).map_err(SessionError::from)?;
			return Ok(());
		}

		let client = app::create_client(&settings).await?;
		let mut session = Session::new(
			KubeOrchestrator::new(client),
			io::stdout().lock(),
			io::stdin().lock(),
		)
		.with_namespace(settings.namespace.clone())
		.with_retry_policy(settings.retry.policy())
		.with_wait(
			settings.probe.poll_interval(),
			settings.probe.wait_timeout(),
		);

		match self {
			Self::Show(_) => Ok(()),
			Self::Apply(args) => {
				let spec = app::load_spec(&args.file).await?;
				Ok(session.apply(&spec).await?)
			}
			Self::Update(args) => Ok(session
				.update(&args.name, args.replicas, &args.image)
				.await?),
			Self::Delete(args) => Ok(session.delete(&args.name, !args.orphan_children).await?),
			Self::Pods(args) => {
				session.pods(args.target_namespace.as_deref()).await?;
				Ok(())
			}
			Self::Status(args) => {
				session.status(&args.name).await?;
				Ok(())
			}
			Self::Demo(args) => {
				let spec = app::load_spec(&args.spec.file).await?;
				let options = DemoOptions {
					replicas: args.replicas,
					image: args.image,
				};
				Ok(session
					.with_pause(args.pause)
					.demo(&spec, &options)
					.await?)
			}
		}
	}
}
