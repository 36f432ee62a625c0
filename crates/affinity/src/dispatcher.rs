use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::ThreadId;
use std::time::Instant;

use crate::queue::TaskQueue;
use crate::{AffinityContext, AffinityError, ContextId, DispatcherConfig, Task, panic_message, registry};

/// Shared half of a dispatcher: the part other threads post into.
struct DispatcherShared {
	id: ContextId,
	owner: ThreadId,
	queue: TaskQueue,
	config: DispatcherConfig,
	executed: AtomicU64,
}

impl DispatcherShared {
	fn run_task(&self, task: Task) {
		if let Err(payload) = std::panic::catch_unwind(AssertUnwindSafe(task)) {
			let message = panic_message(&*payload).unwrap_or_else(|| "<non-string panic payload>".to_string());
			tracing::error!(context = %self.id, panic = %message, "affinity.task_panicked");
		}
		self.executed.fetch_add(1, Ordering::Relaxed);
	}
}

impl AffinityContext for DispatcherShared {
	fn id(&self) -> ContextId {
		self.id
	}

	fn owner(&self) -> ThreadId {
		self.owner
	}

	fn post(&self, task: Task) -> Result<(), AffinityError> {
		let depth = self.queue.push(task)?;
		tracing::trace!(context = %self.id, depth, "affinity.post");
		Ok(())
	}

	fn pump_until(&self, predicate: &mut dyn FnMut() -> bool, deadline: Option<Instant>) -> Result<(), AffinityError> {
		if !self.is_current() {
			tracing::warn!(context = %self.id, caller = ?std::thread::current().id(), "affinity.pump.foreign_thread");
			return Err(AffinityError::InvalidContext);
		}

		let start = Instant::now();
		let idle = self.config.idle_wait();
		loop {
			if predicate() {
				return Ok(());
			}

			let now = Instant::now();
			let wait = match deadline {
				Some(deadline) if now >= deadline => {
					let waited = now.duration_since(start);
					tracing::warn!(context = %self.id, ?waited, "affinity.pump.timeout");
					return Err(AffinityError::Timeout { waited });
				}
				Some(deadline) => idle.min(deadline - now),
				None => idle,
			};

			if let Some(task) = self.queue.pop_wait(wait) {
				self.run_task(task);
			}
		}
	}

	fn is_closed(&self) -> bool {
		self.queue.is_closed()
	}
}

/// Queue-based affinity context attached to the calling thread.
///
/// The owner drives it like a message pump: [`run_pending`](Self::run_pending) from an existing
/// loop, or [`run_until_closed`](Self::run_until_closed) as the loop itself. The handle is pinned
/// to its owner thread; other threads reach it through [`context`](Self::context).
///
/// Dropping the handle closes the queue and removes the registry binding.
pub struct Dispatcher {
	shared: Arc<DispatcherShared>,
	_owner_bound: PhantomData<*const ()>,
}

impl Dispatcher {
	/// Creates a context owned by the calling thread and registers it.
	///
	/// Fails with [`AffinityError::AlreadyAttached`] if the thread already owns a live context.
	pub fn attach(config: DispatcherConfig) -> Result<Self, AffinityError> {
		let owner = std::thread::current().id();
		if registry::has_live(owner) {
			return Err(AffinityError::AlreadyAttached);
		}

		let shared = Arc::new(DispatcherShared {
			id: ContextId::next(),
			owner,
			queue: TaskQueue::new(),
			config,
			executed: AtomicU64::new(0),
		});
		registry::register(shared.clone());
		Ok(Self {
			shared,
			_owner_bound: PhantomData,
		})
	}

	/// Returns the context identity.
	pub fn id(&self) -> ContextId {
		self.shared.id
	}

	/// Returns a handle other threads can post to.
	pub fn context(&self) -> Arc<dyn AffinityContext> {
		self.shared.clone()
	}

	/// Runs tasks queued right now, up to `max_tasks_per_pump`, and returns how many ran.
	///
	/// Tasks posted by the tasks themselves wait for the next call.
	pub fn run_pending(&self) -> usize {
		let budget = self.shared.queue.len().min(self.shared.config.max_tasks_per_pump);
		let mut ran = 0;
		while ran < budget {
			let Some(task) = self.shared.queue.pop() else {
				break;
			};
			self.shared.run_task(task);
			ran += 1;
		}
		ran
	}

	/// Pumps until `predicate` holds; see [`AffinityContext::pump_until`].
	pub fn run_until(&self, mut predicate: impl FnMut() -> bool, deadline: Option<Instant>) -> Result<(), AffinityError> {
		self.shared.pump_until(&mut predicate, deadline)
	}

	/// Runs the loop until the queue is closed and drained, returning the number of tasks run.
	pub fn run_until_closed(&self) -> u64 {
		let before = self.executed();
		let idle = self.shared.config.idle_wait();
		while !self.shared.queue.is_drained() {
			if let Some(task) = self.shared.queue.pop_wait(idle) {
				self.shared.run_task(task);
			}
		}
		self.executed() - before
	}

	/// Stops accepting new work. Already queued tasks still run.
	pub fn close(&self) {
		if self.shared.queue.close() {
			tracing::debug!(context = %self.shared.id, pending = self.shared.queue.len(), "affinity.close");
		}
	}

	/// Returns the number of queued tasks.
	pub fn pending(&self) -> usize {
		self.shared.queue.len()
	}

	/// Returns the total number of tasks run so far.
	pub fn executed(&self) -> u64 {
		self.shared.executed.load(Ordering::Relaxed)
	}
}

impl Drop for Dispatcher {
	fn drop(&mut self) {
		self.close();
		// Queued tasks may own an `Arc` of this context, so they must not outlive the handle.
		let dropped = self.shared.queue.clear();
		if dropped > 0 {
			tracing::warn!(context = %self.shared.id, dropped, "affinity.drop_with_pending");
		}
		registry::unregister_if(self.shared.owner, self.shared.id);
	}
}

/// Dedicated OS thread running a [`Dispatcher`] loop.
///
/// Dropping it shuts the loop down the same way [`shutdown`](Self::shutdown) does.
pub struct DispatcherThread {
	shared: Arc<DispatcherShared>,
	handle: Option<std::thread::JoinHandle<u64>>,
}

impl DispatcherThread {
	/// Spawns the loop thread and waits until its context is registered.
	pub fn spawn(config: DispatcherConfig) -> std::io::Result<Self> {
		let (tx, rx) = std::sync::mpsc::sync_channel::<Arc<DispatcherShared>>(1);
		let name = config.thread_name.clone();
		let handle = std::thread::Builder::new().name(name.clone()).spawn(move || {
			let dispatcher = match Dispatcher::attach(config) {
				Ok(dispatcher) => dispatcher,
				Err(err) => {
					tracing::error!(error = %err, "affinity.thread.attach_failed");
					return 0;
				}
			};
			if tx.send(Arc::clone(&dispatcher.shared)).is_err() {
				return 0;
			}
			dispatcher.run_until_closed()
		})?;

		let shared = rx
			.recv()
			.map_err(|_| std::io::Error::other(format!("dispatcher thread {name:?} exited before attaching")))?;
		tracing::debug!(context = %shared.id, thread = %name, "affinity.thread.spawned");
		Ok(Self {
			shared,
			handle: Some(handle),
		})
	}

	/// Returns the context identity.
	pub fn id(&self) -> ContextId {
		self.shared.id
	}

	/// Returns a handle other threads can post to.
	pub fn context(&self) -> Arc<dyn AffinityContext> {
		self.shared.clone()
	}

	/// Posts a closure to the loop thread.
	pub fn post_fn<F>(&self, f: F) -> Result<(), AffinityError>
	where
		F: FnOnce() + Send + 'static,
	{
		self.shared.post(Box::new(f))
	}

	/// Closes the queue, lets queued tasks finish and joins the thread.
	///
	/// Returns the number of tasks the loop ran.
	pub fn shutdown(mut self) -> u64 {
		self.stop()
	}

	fn stop(&mut self) -> u64 {
		let Some(handle) = self.handle.take() else {
			return 0;
		};
		self.shared.queue.close();
		// Joining from the loop thread itself would deadlock; the loop exits on its own once drained.
		if handle.thread().id() == std::thread::current().id() {
			return 0;
		}
		match handle.join() {
			Ok(ran) => ran,
			Err(payload) => {
				let message = panic_message(&*payload).unwrap_or_default();
				tracing::error!(context = %self.shared.id, panic = %message, "affinity.thread.panicked");
				0
			}
		}
	}
}

impl Drop for DispatcherThread {
	fn drop(&mut self) {
		self.stop();
	}
}
