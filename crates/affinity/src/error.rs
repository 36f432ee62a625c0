use std::time::Duration;

/// Affinity context failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AffinityError {
	/// An owner-only operation was called from a foreign thread.
	#[error("operation requires the owning thread of the affinity context")]
	InvalidContext,
	/// A cooperative wait reached its deadline before the predicate held.
	#[error("affinity wait timed out after {waited:?}")]
	Timeout { waited: Duration },
	/// The context no longer accepts work.
	#[error("affinity context is closed")]
	Closed,
	/// The calling thread already owns a live context.
	#[error("thread already owns an affinity context")]
	AlreadyAttached,
}
