use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::{AffinityError, Task};

struct QueueState {
	tasks: VecDeque<Task>,
	closed: bool,
}

/// Unbounded FIFO task queue shared between posting threads and the owner.
///
/// Closing stops new pushes; tasks already queued stay poppable so the owner can drain them.
pub(crate) struct TaskQueue {
	state: Mutex<QueueState>,
	ready: Condvar,
}

impl TaskQueue {
	pub fn new() -> Self {
		Self {
			state: Mutex::new(QueueState {
				tasks: VecDeque::new(),
				closed: false,
			}),
			ready: Condvar::new(),
		}
	}

	/// Enqueues a task and returns the queue depth after the push.
	pub fn push(&self, task: Task) -> Result<usize, AffinityError> {
		let mut state = self.state.lock();
		if state.closed {
			return Err(AffinityError::Closed);
		}
		state.tasks.push_back(task);
		let depth = state.tasks.len();
		drop(state);
		self.ready.notify_one();
		Ok(depth)
	}

	/// Pops the head task without waiting.
	pub fn pop(&self) -> Option<Task> {
		self.state.lock().tasks.pop_front()
	}

	/// Pops the head task, parking up to `timeout` while the queue is empty.
	pub fn pop_wait(&self, timeout: Duration) -> Option<Task> {
		let mut state = self.state.lock();
		if let Some(task) = state.tasks.pop_front() {
			return Some(task);
		}
		let _ = self.ready.wait_for(&mut state, timeout);
		state.tasks.pop_front()
	}

	/// Stops accepting new tasks and wakes any parked owner.
	pub fn close(&self) -> bool {
		let mut state = self.state.lock();
		let was_open = !state.closed;
		state.closed = true;
		drop(state);
		self.ready.notify_all();
		was_open
	}

	pub fn is_closed(&self) -> bool {
		self.state.lock().closed
	}

	/// Returns true once closed with nothing left to run.
	pub fn is_drained(&self) -> bool {
		let state = self.state.lock();
		state.closed && state.tasks.is_empty()
	}

	pub fn len(&self) -> usize {
		self.state.lock().tasks.len()
	}

	/// Discards every queued task and returns how many there were.
	///
	/// Tasks are dropped after the lock is released; their captures may post back here.
	pub fn clear(&self) -> usize {
		let tasks = std::mem::take(&mut self.state.lock().tasks);
		let dropped = tasks.len();
		drop(tasks);
		dropped
	}
}
