//! Subscriber registry and change delivery pipeline.
//!
//! # Purpose
//!
//! A [`ChangeNotifier`] fans each committed [`ChangeDescriptor`] out to its subscribers. Plain
//! subscribers are called on the publishing thread; subscribers registered with an affinity
//! context receive their calls as tasks posted to that context.
//!
//! # Mental Model
//!
//! 1. **Stage:** A container stages its descriptor while it still holds its guard, so staging
//!    order equals commit order. An open bulk session may absorb the descriptor instead.
//! 2. **Flush:** After releasing the guard the container flushes. One thread at a time drains the
//!    staged queue in FIFO order; a flush that finds a drain in progress leaves its descriptors to
//!    that drainer. Re-entrant publishes from inside callbacks land here too.
//! 3. **Deliver:** Each subscriber is invoked under its own lock, inside `catch_unwind`.
//!
//! # Invariants
//!
//! - A subscriber callback never runs concurrently with itself.
//!   - Enforced in: `Subscriber::invoke`, `Subscriber::invoke_posted`.
//! - A panicking callback is logged and skipped; the publisher and other subscribers proceed.
//!   - Enforced in: `Subscriber::run`.
//! - An empty bulk session publishes nothing.
//!   - Enforced in: [`ChangeNotifier::end_bulk`].
//! - Each subscriber sees descriptors in staging order.
//!   - Enforced in: [`ChangeNotifier::flush`] (single drainer) and FIFO affinity queues.

mod bulk;

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use arc_swap::ArcSwap;
use bulk::BulkSession;
use parking_lot::Mutex;
use tether_affinity::{AffinityContext, panic_message};

use crate::{ChangeAction, ChangeDescriptor};

/// Subscriber callback.
pub type Callback<T> = Box<dyn FnMut(&ChangeDescriptor<T>) + Send + 'static>;

/// Handle returned by [`ChangeNotifier::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

struct Subscriber<T> {
	id: SubscriptionId,
	affinity: Option<Arc<dyn AffinityContext>>,
	callback: Mutex<Callback<T>>,
	active: AtomicBool,
}

impl<T: Send + Sync + 'static> Subscriber<T> {
	/// Synchronous delivery on the flushing thread.
	fn invoke(&self, descriptor: &ChangeDescriptor<T>) {
		let mut callback = self.callback.lock();
		self.run(&mut callback, descriptor);
	}

	/// Delivery on the subscriber's affinity thread.
	fn invoke_posted(self: Arc<Self>, descriptor: Arc<ChangeDescriptor<T>>) {
		if !self.active.load(Ordering::Acquire) {
			return;
		}
		// Only a nested pump inside this same callback can hold the lock here; requeue so the
		// outer call finishes first and order is preserved.
		let Some(mut callback) = self.callback.try_lock() else {
			tracing::trace!(subscription = self.id.0, "notifier.deliver.deferred");
			self.post(descriptor);
			return;
		};
		self.run(&mut callback, &descriptor);
	}

	fn post(self: &Arc<Self>, descriptor: Arc<ChangeDescriptor<T>>) {
		let Some(ctx) = &self.affinity else {
			return;
		};
		let this = Arc::clone(self);
		if let Err(err) = ctx.post_fn(move || this.invoke_posted(descriptor)) {
			tracing::warn!(subscription = self.id.0, context = %ctx.id(), error = %err, "notifier.deliver.post_failed");
		}
	}

	fn run(&self, callback: &mut Callback<T>, descriptor: &ChangeDescriptor<T>) {
		if let Err(payload) = std::panic::catch_unwind(AssertUnwindSafe(|| callback(descriptor))) {
			let message = panic_message(&*payload).unwrap_or_else(|| "<non-string panic payload>".to_string());
			tracing::error!(
				subscription = self.id.0,
				action = descriptor.action().as_str(),
				panic = %message,
				"notifier.subscriber_panicked"
			);
		}
	}
}

struct Pending<T> {
	queue: VecDeque<Arc<ChangeDescriptor<T>>>,
	bulk: Option<BulkSession<T>>,
	delivering: bool,
}

/// Subscriber list plus ordered, coalescing delivery of change descriptors.
pub struct ChangeNotifier<T> {
	subscribers: ArcSwap<Vec<Arc<Subscriber<T>>>>,
	pending: Mutex<Pending<T>>,
	next_id: AtomicU64,
}

impl<T: Send + Sync + 'static> ChangeNotifier<T> {
	pub fn new() -> Self {
		Self {
			subscribers: ArcSwap::from_pointee(Vec::new()),
			pending: Mutex::new(Pending {
				queue: VecDeque::new(),
				bulk: None,
				delivering: false,
			}),
			next_id: AtomicU64::new(1),
		}
	}

	/// Registers a callback invoked synchronously on the publishing thread.
	pub fn subscribe(&self, callback: impl FnMut(&ChangeDescriptor<T>) + Send + 'static) -> SubscriptionId {
		self.add_subscriber(None, Box::new(callback))
	}

	/// Registers a callback delivered by posting to `context`.
	pub fn subscribe_on(&self, context: Arc<dyn AffinityContext>, callback: impl FnMut(&ChangeDescriptor<T>) + Send + 'static) -> SubscriptionId {
		self.add_subscriber(Some(context), Box::new(callback))
	}

	/// Registers a callback with an optional affinity hint.
	pub fn subscribe_with(&self, affinity: Option<Arc<dyn AffinityContext>>, callback: Callback<T>) -> SubscriptionId {
		self.add_subscriber(affinity, callback)
	}

	fn add_subscriber(&self, affinity: Option<Arc<dyn AffinityContext>>, callback: Callback<T>) -> SubscriptionId {
		let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
		let context = affinity.as_ref().map(|ctx| ctx.id());
		let subscriber = Arc::new(Subscriber {
			id,
			affinity,
			callback: Mutex::new(callback),
			active: AtomicBool::new(true),
		});
		self.subscribers.rcu(|current| {
			let mut next = Vec::clone(current);
			next.push(Arc::clone(&subscriber));
			next
		});
		tracing::debug!(subscription = id.0, ?context, "notifier.subscribe");
		id
	}

	/// Removes a subscriber. Deliveries already posted to its context are dropped.
	pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
		let mut removed = false;
		self.subscribers.rcu(|current| {
			let mut next = Vec::clone(current);
			removed = false;
			next.retain(|sub| {
				if sub.id == id {
					sub.active.store(false, Ordering::Release);
					removed = true;
					false
				} else {
					true
				}
			});
			next
		});
		if removed {
			tracing::debug!(subscription = id.0, "notifier.unsubscribe");
		}
		removed
	}

	pub fn subscriber_count(&self) -> usize {
		self.subscribers.load().len()
	}

	/// Delivers `descriptor` to every subscriber, or folds it into a matching bulk session.
	pub fn publish(&self, descriptor: ChangeDescriptor<T>) {
		self.stage(descriptor);
		self.flush();
	}

	/// Queues `descriptor` for delivery without delivering it.
	pub(crate) fn stage(&self, descriptor: ChangeDescriptor<T>) {
		let mut pending = self.pending.lock();
		if let Some(session) = pending.bulk.as_mut()
			&& session.action() == descriptor.action()
		{
			session.merge(descriptor);
			return;
		}
		pending.queue.push_back(Arc::new(descriptor));
	}

	/// Delivers staged descriptors unless another thread is already doing so.
	pub(crate) fn flush(&self) {
		loop {
			let batch = {
				let mut pending = self.pending.lock();
				if pending.delivering || pending.queue.is_empty() {
					return;
				}
				pending.delivering = true;
				std::mem::take(&mut pending.queue)
			};

			for descriptor in batch {
				self.deliver(descriptor);
			}

			self.pending.lock().delivering = false;
		}
	}

	fn deliver(&self, descriptor: Arc<ChangeDescriptor<T>>) {
		let subscribers = self.subscribers.load_full();
		tracing::trace!(
			action = descriptor.action().as_str(),
			items = descriptor.items().len(),
			start_index = ?descriptor.start_index(),
			subscribers = subscribers.len(),
			"notifier.publish"
		);
		for subscriber in subscribers.iter() {
			if !subscriber.active.load(Ordering::Acquire) {
				continue;
			}
			if subscriber.affinity.is_some() {
				subscriber.post(Arc::clone(&descriptor));
			} else {
				subscriber.invoke(&descriptor);
			}
		}
	}

	/// Opens a bulk session for `action`, closing any session already open.
	pub fn begin_bulk(&self, action: ChangeAction) {
		{
			let mut pending = self.pending.lock();
			if let Some(previous) = pending.bulk.take() {
				tracing::debug!(previous = previous.action().as_str(), next = action.as_str(), "notifier.bulk.superseded");
				if let Some(merged) = previous.finish() {
					pending.queue.push_back(Arc::new(merged));
				}
			}
			pending.bulk = Some(BulkSession::new(action));
		}
		tracing::debug!(action = action.as_str(), "notifier.bulk.begin");
		self.flush();
	}

	/// Closes the open bulk session, publishing its merged descriptor if it absorbed anything.
	///
	/// Returns true when a descriptor was published. Without an open session this does nothing.
	pub fn end_bulk(&self) -> bool {
		let emitted = {
			let mut pending = self.pending.lock();
			let Some(session) = pending.bulk.take() else {
				return false;
			};
			let merged = session.merged_count();
			tracing::debug!(action = session.action().as_str(), merged, "notifier.bulk.flush");
			match session.finish() {
				Some(descriptor) => {
					pending.queue.push_back(Arc::new(descriptor));
					true
				}
				None => false,
			}
		};
		self.flush();
		emitted
	}

	/// Returns a scope that ends the bulk session when dropped.
	pub fn bulk_scope(&self, action: ChangeAction) -> BulkScope<'_, T> {
		self.begin_bulk(action);
		BulkScope { notifier: self }
	}

	/// Runs `f` inside a bulk session for `action`.
	pub fn bulk<R>(&self, action: ChangeAction, f: impl FnOnce() -> R) -> R {
		let _scope = self.bulk_scope(action);
		f()
	}

	pub fn is_bulk_open(&self) -> bool {
		self.pending.lock().bulk.is_some()
	}
}

impl<T: Send + Sync + 'static> Default for ChangeNotifier<T> {
	fn default() -> Self {
		Self::new()
	}
}

impl<T> std::fmt::Debug for ChangeNotifier<T> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let pending = self.pending.lock();
		f.debug_struct("ChangeNotifier")
			.field("subscribers", &self.subscribers.load().len())
			.field("staged", &pending.queue.len())
			.field("bulk", &pending.bulk.as_ref().map(BulkSession::action))
			.finish()
	}
}

/// Ends a bulk session on drop.
#[must_use = "the bulk session ends as soon as the scope is dropped"]
pub struct BulkScope<'a, T: Send + Sync + 'static> {
	notifier: &'a ChangeNotifier<T>,
}

impl<T: Send + Sync + 'static> Drop for BulkScope<'_, T> {
	fn drop(&mut self) {
		self.notifier.end_bulk();
	}
}
