use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::ThreadId;
use std::time::{Duration, Instant};

use crate::AffinityError;

/// Unit of work posted to an affinity context.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Process-unique identity of one affinity context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u64);

impl ContextId {
	/// Allocates the next context ID, starting at 1.
	pub(crate) fn next() -> Self {
		static NEXT: AtomicU64 = AtomicU64::new(1);
		Self(NEXT.fetch_add(1, Ordering::Relaxed))
	}

	/// Returns the raw ID.
	pub const fn get(self) -> u64 {
		self.0
	}
}

impl fmt::Display for ContextId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "ctx#{}", self.0)
	}
}

/// A serial execution context bound to a single owner thread.
///
/// Implementations must run posted tasks only on [`owner`](Self::owner), in FIFO order.
pub trait AffinityContext: Send + Sync {
	/// Returns the context identity.
	fn id(&self) -> ContextId;

	/// Returns the thread that owns this context.
	fn owner(&self) -> ThreadId;

	/// Returns true when called on the owner thread.
	fn is_current(&self) -> bool {
		std::thread::current().id() == self.owner()
	}

	/// Schedules `task` on the owner's queue and returns immediately.
	fn post(&self, task: Task) -> Result<(), AffinityError>;

	/// Runs queued tasks on the owner thread until `predicate` returns true.
	///
	/// Fails with [`AffinityError::InvalidContext`] when called off the owner thread and with
	/// [`AffinityError::Timeout`] once `deadline` passes.
	fn pump_until(&self, predicate: &mut dyn FnMut() -> bool, deadline: Option<Instant>) -> Result<(), AffinityError>;

	/// Returns true once the context stopped accepting work.
	fn is_closed(&self) -> bool;
}

impl dyn AffinityContext + '_ {
	/// Posts a closure without boxing it at the call site.
	pub fn post_fn<F>(&self, f: F) -> Result<(), AffinityError>
	where
		F: FnOnce() + Send + 'static,
	{
		self.post(Box::new(f))
	}

	/// Pumps until `predicate` holds or `timeout` elapses.
	pub fn pump_for(&self, mut predicate: impl FnMut() -> bool, timeout: Duration) -> Result<(), AffinityError> {
		self.pump_until(&mut predicate, Instant::now().checked_add(timeout))
	}
}

impl fmt::Debug for dyn AffinityContext + '_ {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("AffinityContext")
			.field("id", &self.id())
			.field("owner", &self.owner())
			.field("closed", &self.is_closed())
			.finish()
	}
}
