use std::time::Duration;

use tether_affinity::AffinityError;

/// Mutation guard failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum GuardError {
	/// The guard stayed busy past the acquire deadline.
	#[error("guard acquire timed out after {waited:?}")]
	Timeout { waited: Duration },
	/// Release was requested on a guard nobody holds.
	#[error("guard released while not held")]
	NotHeld,
	/// The cooperative wait on the caller's affinity context failed.
	#[error("affinity wait failed: {0}")]
	Affinity(AffinityError),
}

impl From<AffinityError> for GuardError {
	fn from(err: AffinityError) -> Self {
		match err {
			AffinityError::Timeout { waited } => Self::Timeout { waited },
			other => Self::Affinity(other),
		}
	}
}

/// Container operation failures.
///
/// Every failure is reported before anything is committed: the container is unchanged and no
/// change notification is published.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CollectionError {
	#[error("index {index} out of range for length {len}")]
	IndexOutOfRange { index: usize, len: usize },
	#[error("invalid argument: {0}")]
	InvalidArgument(String),
	#[error("duplicate key: {key}")]
	DuplicateKey { key: String },
	#[error(transparent)]
	Guard(#[from] GuardError),
}

pub type Result<T, E = CollectionError> = std::result::Result<T, E>;
