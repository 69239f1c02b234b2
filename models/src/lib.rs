#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::missing_docs_in_private_items)]

//! Models shared by the deployment controller. This crate holds the
//! declarative workload document that an operator writes, along with the typed
//! representation the controller works with once the document is decoded.

/// The errors that can occur while decoding a workload document.
mod error;
/// The workload document, both as it is written on disk and in its decoded,
/// flattened form.
mod workload;

/// A prelude that re-exports commonly used items.
pub mod prelude {
	pub use crate::{
		error::DecodeError,
		workload::{ContainerSpec, WorkloadSpec, APP_LABEL},
	};
}

pub use self::{error::*, workload::*};
