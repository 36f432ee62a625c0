//! Guarded ordered container with change notification.
//!
//! Every operation, reads included, runs under the sequence's [`MutationGuard`](crate::MutationGuard),
//! so no caller ever sees a half-applied mutation. Mutations stage their descriptor before the
//! guard is released and deliver it afterwards, which keeps subscriber order equal to commit
//! order without running callbacks under the guard.

#[cfg(test)]
mod tests;

use std::cmp::Ordering;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use tether_affinity::AffinityContext;

use crate::notifier::{ChangeNotifier, SubscriptionId};
use crate::{ChangeAction, ChangeDescriptor, CollectionError, GuardConfig, Guarded, Result};

/// Thread-safe observable list.
pub struct ObservableSequence<T> {
	items: Guarded<Vec<T>>,
	notifier: ChangeNotifier<T>,
}

impl<T> ObservableSequence<T>
where
	T: Clone + Send + Sync + 'static,
{
	/// Creates an empty sequence with a blocking guard.
	pub fn new() -> Self {
		Self::with_config(GuardConfig::default())
	}

	pub fn with_config(config: GuardConfig) -> Self {
		Self::from_vec(Vec::new(), config)
	}

	/// Wraps existing items. No notification is published for them.
	pub fn from_vec(items: Vec<T>, config: GuardConfig) -> Self {
		Self {
			items: Guarded::new(items, config),
			notifier: ChangeNotifier::new(),
		}
	}

	/// Runs `op` under the guard, then publishes the change it reports.
	///
	/// `op` must validate before mutating: an `Err` leaves the items untouched.
	fn commit<R>(&self, op: impl FnOnce(&mut Vec<T>) -> Result<(R, Option<ChangeDescriptor<T>>)>) -> Result<R> {
		let mut items = self.items.lock()?;
		let (value, change) = op(&mut items)?;
		if let Some(change) = change {
			tracing::trace!(action = change.action().as_str(), len = items.len(), "sequence.commit");
			self.notifier.stage(change);
		}
		drop(items);
		self.notifier.flush();
		Ok(value)
	}

	/// Runs caller code that rearranges items in place, publishing `Reset` when `op` reports a change.
	///
	/// A panic in `op` may leave the items partly rearranged, so `Reset` is published before the
	/// panic resumes.
	fn commit_reordering<R>(&self, op: impl FnOnce(&mut Vec<T>) -> (R, bool)) -> Result<R> {
		let mut items = self.items.lock()?;
		let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| op(&mut *items)));
		let changed = outcome.as_ref().map_or(true, |(_, changed)| *changed);
		if changed {
			tracing::trace!(len = items.len(), panicked = outcome.is_err(), "sequence.commit.reordered");
			self.notifier.stage(ChangeDescriptor::reset());
		}
		drop(items);
		self.notifier.flush();
		match outcome {
			Ok((value, _)) => Ok(value),
			Err(payload) => std::panic::resume_unwind(payload),
		}
	}

	/// Runs `f` against a consistent view of the items.
	pub fn read<R>(&self, f: impl FnOnce(&[T]) -> R) -> Result<R> {
		let items = self.items.lock()?;
		Ok(f(&items))
	}

	pub fn count(&self) -> Result<usize> {
		self.read(<[T]>::len)
	}

	pub fn is_empty(&self) -> Result<bool> {
		self.read(<[T]>::is_empty)
	}

	pub fn get(&self, index: usize) -> Result<T> {
		self.read(|items| items.get(index).cloned().ok_or(out_of_range(index, items.len())))?
	}

	/// Copies the current items.
	pub fn to_vec(&self) -> Result<Vec<T>> {
		self.read(<[T]>::to_vec)
	}

	/// Overwrites the item at `index`, returning the previous value.
	pub fn set(&self, index: usize, value: T) -> Result<T> {
		self.commit(|items| {
			let len = items.len();
			let slot = items.get_mut(index).ok_or(out_of_range(index, len))?;
			let old = std::mem::replace(slot, value.clone());
			let change = ChangeDescriptor::replaced(vec![value], vec![old.clone()], Some(index));
			Ok((old, Some(change)))
		})
	}

	/// Appends `value`, returning its index.
	pub fn add(&self, value: T) -> Result<usize> {
		self.commit(|items| {
			let index = items.len();
			items.push(value.clone());
			Ok((index, Some(ChangeDescriptor::added(vec![value], Some(index)))))
		})
	}

	/// Appends all `values` as one change, returning how many were added.
	pub fn add_range(&self, values: impl IntoIterator<Item = T>) -> Result<usize> {
		let values: Vec<T> = values.into_iter().collect();
		self.commit(|items| {
			let index = items.len();
			Ok(splice_in(items, index, values))
		})
	}

	/// Inserts `value` at `index`; `index == count` appends.
	pub fn insert(&self, index: usize, value: T) -> Result<()> {
		self.commit(|items| {
			if index > items.len() {
				return Err(out_of_range(index, items.len()));
			}
			items.insert(index, value.clone());
			Ok(((), Some(ChangeDescriptor::added(vec![value], Some(index)))))
		})
	}

	/// Inserts all `values` at `index` as one change.
	pub fn insert_range(&self, index: usize, values: impl IntoIterator<Item = T>) -> Result<usize> {
		let values: Vec<T> = values.into_iter().collect();
		self.commit(|items| {
			if index > items.len() {
				return Err(out_of_range(index, items.len()));
			}
			Ok(splice_in(items, index, values))
		})
	}

	/// Removes and returns the item at `index`.
	pub fn remove_at(&self, index: usize) -> Result<T> {
		self.commit(|items| {
			if index >= items.len() {
				return Err(out_of_range(index, items.len()));
			}
			let old = items.remove(index);
			let change = ChangeDescriptor::removed(vec![old.clone()], Some(index));
			Ok((old, Some(change)))
		})
	}

	/// Removes `count` items starting at `index` as one change.
	pub fn remove_range(&self, index: usize, count: usize) -> Result<Vec<T>> {
		self.commit(|items| {
			let len = items.len();
			if index > len {
				return Err(out_of_range(index, len));
			}
			let end = index
				.checked_add(count)
				.filter(|end| *end <= len)
				.ok_or_else(|| CollectionError::InvalidArgument(format!("range of {count} at {index} exceeds length {len}")))?;
			if count == 0 {
				return Ok((Vec::new(), None));
			}
			let removed: Vec<T> = items.drain(index..end).collect();
			let change = ChangeDescriptor::removed(removed.clone(), Some(index));
			Ok((removed, Some(change)))
		})
	}

	/// Removes every item matching `predicate`, returning how many went.
	///
	/// Publishes a single [`ChangeAction::Reset`] when anything was removed, or when `predicate`
	/// panics.
	pub fn remove_all(&self, mut predicate: impl FnMut(&T) -> bool) -> Result<usize> {
		self.commit_reordering(|items| {
			let before = items.len();
			items.retain(|item| !predicate(item));
			let removed = before - items.len();
			(removed, removed > 0)
		})
	}

	/// Removes every item.
	pub fn clear(&self) -> Result<()> {
		self.commit(|items| {
			items.clear();
			Ok(((), Some(ChangeDescriptor::reset())))
		})
	}

	/// Sorts with `compare`, which runs under the guard and must not touch this sequence.
	///
	/// Publishes [`ChangeAction::Reset`], also when `compare` panics mid-sort.
	pub fn sort_by(&self, compare: impl FnMut(&T, &T) -> Ordering) -> Result<()> {
		self.commit_reordering(|items| {
			items.sort_by(compare);
			((), true)
		})
	}

	pub fn reverse(&self) -> Result<()> {
		self.commit(|items| {
			items.reverse();
			Ok(((), Some(ChangeDescriptor::reset())))
		})
	}

	pub fn notifier(&self) -> &ChangeNotifier<T> {
		&self.notifier
	}

	pub fn subscribe(&self, callback: impl FnMut(&ChangeDescriptor<T>) + Send + 'static) -> SubscriptionId {
		self.notifier.subscribe(callback)
	}

	pub fn subscribe_on(&self, context: Arc<dyn AffinityContext>, callback: impl FnMut(&ChangeDescriptor<T>) + Send + 'static) -> SubscriptionId {
		self.notifier.subscribe_on(context, callback)
	}

	pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
		self.notifier.unsubscribe(id)
	}

	pub fn begin_bulk(&self, action: ChangeAction) {
		self.notifier.begin_bulk(action);
	}

	pub fn end_bulk(&self) -> bool {
		self.notifier.end_bulk()
	}
}

impl<T> ObservableSequence<T>
where
	T: Clone + Ord + Send + Sync + 'static,
{
	pub fn sort(&self) -> Result<()> {
		self.sort_by(T::cmp)
	}
}

impl<T> ObservableSequence<T>
where
	T: Clone + PartialEq + Send + Sync + 'static,
{
	/// Removes the first item equal to `value`.
	pub fn remove(&self, value: &T) -> Result<bool> {
		self.commit(|items| {
			let Some(index) = items.iter().position(|item| item == value) else {
				return Ok((false, None));
			};
			let old = items.remove(index);
			Ok((true, Some(ChangeDescriptor::removed(vec![old], Some(index)))))
		})
	}

	pub fn contains(&self, value: &T) -> Result<bool> {
		self.read(|items| items.contains(value))
	}

	pub fn index_of(&self, value: &T) -> Result<Option<usize>> {
		self.read(|items| items.iter().position(|item| item == value))
	}
}

impl<T> Default for ObservableSequence<T>
where
	T: Clone + Send + Sync + 'static,
{
	fn default() -> Self {
		Self::new()
	}
}

impl<T> From<Vec<T>> for ObservableSequence<T>
where
	T: Clone + Send + Sync + 'static,
{
	fn from(items: Vec<T>) -> Self {
		Self::from_vec(items, GuardConfig::default())
	}
}

impl<T> std::fmt::Debug for ObservableSequence<T> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ObservableSequence")
			.field("strategy", &self.items.config().strategy)
			.field("locked", &self.items.is_locked())
			.field("notifier", &self.notifier)
			.finish()
	}
}

fn out_of_range(index: usize, len: usize) -> CollectionError {
	CollectionError::IndexOutOfRange { index, len }
}

fn splice_in<T: Clone>(items: &mut Vec<T>, index: usize, values: Vec<T>) -> (usize, Option<ChangeDescriptor<T>>) {
	if values.is_empty() {
		return (0, None);
	}
	let count = values.len();
	items.splice(index..index, values.iter().cloned());
	(count, Some(ChangeDescriptor::added(values, Some(index))))
}
