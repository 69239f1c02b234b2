use thiserror::Error;

/// A list of all the reasons a workload document can fail to decode. Decoding
/// errors are always local to the input and are never retried.
#[derive(Debug, Error)]
pub enum DecodeError {
	/// The input is not a well-formed document of the expected shape, or one of
	/// its fields has the wrong type (e.g. text where a number is expected).
	#[error("malformed workload document: {0}")]
	Malformed(#[from] serde_yaml::Error),
	/// A path the controller depends on is absent from the document. The
	/// value is the dotted path of the missing field.
	#[error("workload document is missing `{0}`")]
	MissingField(&'static str),
}
