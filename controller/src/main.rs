#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::missing_docs_in_private_items)]

//! `deployctl`: creates, updates and deletes a Kubernetes deployment from a
//! workload document, and counts the pods running in a namespace.

use clap::Parser;

use crate::prelude::*;

/// Settings, logging and the connection to the cluster.
mod app;
/// All the commands, arguments and the functionalities for it.
mod commands;

/// A prelude that re-exports commonly used items.
pub mod prelude {
	pub use deployctl::prelude::*;

	pub use crate::commands::{AppArgs, GlobalArgs, GlobalCommands};
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let AppArgs {
		global_args,
		command,
	} = AppArgs::parse();

	command.execute(&global_args).await?;

	Ok(())
}
