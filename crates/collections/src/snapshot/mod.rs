//! Copy-on-write map container with atomic publication.
//!
//! # Role
//!
//! [`ObservableAssociativeSnapshot`] keeps its contents in an immutable [`Snapshot`] that is
//! replaced wholesale on each commit. Readers load the current snapshot and never lock; writers
//! serialize on a commit guard, build the next map from the current one, swap it in, and publish.
//!
//! # Transactions
//!
//! [`do_operation`](ObservableAssociativeSnapshot::do_operation) and
//! [`try_operation`](ObservableAssociativeSnapshot::try_operation) hand the current snapshot to a
//! pure transform. Returning `None` cancels: nothing is swapped and nothing is published.
//!
//! # Invariants
//!
//! - A [`Snapshot`] never changes after it is obtained.
//! - Writers form a total order; the swap and the staging of its descriptor happen under the
//!   commit guard.
//! - `add` on an existing key fails with [`CollectionError::DuplicateKey`]; it never overwrites.

mod backend;
#[cfg(test)]
mod tests;

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::marker::PhantomData;
use std::sync::Arc;

use arc_swap::ArcSwap;
pub use backend::MapBackend;
use rustc_hash::FxHashMap;
use tether_affinity::AffinityContext;

use crate::notifier::{ChangeNotifier, SubscriptionId};
use crate::{ChangeAction, ChangeDescriptor, CollectionError, GuardConfig, Guarded, Result};

/// Hash-keyed observable map.
pub type ObservableHashMap<K, V> = ObservableAssociativeSnapshot<K, V, FxHashMap<K, V>>;

/// Key-ordered observable map.
pub type ObservableOrderedMap<K, V> = ObservableAssociativeSnapshot<K, V, BTreeMap<K, V>>;

/// Immutable view of a map at one commit.
pub struct Snapshot<K, V, M> {
	map: Arc<M>,
	_entries: PhantomData<fn() -> (K, V)>,
}

impl<K, V, M> Clone for Snapshot<K, V, M> {
	fn clone(&self) -> Self {
		Self {
			map: Arc::clone(&self.map),
			_entries: PhantomData,
		}
	}
}

impl<K: 'static, V: 'static, M: MapBackend<K, V>> Snapshot<K, V, M> {
	fn new(map: Arc<M>) -> Self {
		Self { map, _entries: PhantomData }
	}

	pub fn get(&self, key: &K) -> Option<&V> {
		self.map.get(key)
	}

	pub fn contains_key(&self, key: &K) -> bool {
		self.map.contains_key(key)
	}

	pub fn len(&self) -> usize {
		self.map.len()
	}

	pub fn is_empty(&self) -> bool {
		self.map.is_empty()
	}

	pub fn iter(&self) -> M::Iter<'_> {
		self.map.iter()
	}

	pub fn keys(&self) -> impl Iterator<Item = &K> {
		self.map.iter().map(|(k, _)| k)
	}

	pub fn values(&self) -> impl Iterator<Item = &V> {
		self.map.iter().map(|(_, v)| v)
	}

	pub fn as_map(&self) -> &M {
		&self.map
	}

	/// Returns true when both snapshots are the same commit.
	pub fn ptr_eq(&self, other: &Self) -> bool {
		Arc::ptr_eq(&self.map, &other.map)
	}

	/// Clones the underlying map as a starting point for a transform.
	pub fn to_map(&self) -> M {
		M::clone(&self.map)
	}

	/// Next map with `key` added, or `None` if it is already present.
	pub fn with_inserted(&self, key: K, value: V) -> Option<M> {
		if self.contains_key(&key) {
			return None;
		}
		let mut next = self.to_map();
		next.insert(key, value);
		Some(next)
	}

	/// Next map with `key` set to `value`, present or not.
	pub fn with_value(&self, key: K, value: V) -> M {
		let mut next = self.to_map();
		next.insert(key, value);
		next
	}

	/// Next map without `key`, or `None` if it is absent.
	pub fn without(&self, key: &K) -> Option<M> {
		if !self.contains_key(key) {
			return None;
		}
		let mut next = self.to_map();
		next.remove(key);
		Some(next)
	}
}

impl<K, V, M: Debug> Debug for Snapshot<K, V, M> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		Debug::fmt(&self.map, f)
	}
}

type Entry<K, V> = (K, V);
type Staged<K, V, M> = Option<(M, ChangeDescriptor<Entry<K, V>>)>;

/// Observable map whose contents are replaced by atomic swap on every commit.
pub struct ObservableAssociativeSnapshot<K, V, M> {
	current: ArcSwap<M>,
	writer: Guarded<()>,
	notifier: ChangeNotifier<Entry<K, V>>,
}

impl<K, V, M> ObservableAssociativeSnapshot<K, V, M>
where
	K: Clone + Send + Sync + 'static,
	V: Clone + Send + Sync + 'static,
	M: MapBackend<K, V>,
{
	/// Creates an empty map with a blocking commit guard.
	pub fn new() -> Self {
		Self::with_config(GuardConfig::default())
	}

	pub fn with_config(config: GuardConfig) -> Self {
		Self::from_map(M::default(), config)
	}

	/// Wraps an existing map. No notification is published for its entries.
	pub fn from_map(map: M, config: GuardConfig) -> Self {
		Self {
			current: ArcSwap::from_pointee(map),
			writer: Guarded::new((), config),
			notifier: ChangeNotifier::new(),
		}
	}

	/// Loads the current snapshot. Never blocks.
	pub fn snapshot(&self) -> Snapshot<K, V, M> {
		Snapshot::new(self.current.load_full())
	}

	pub fn get(&self, key: &K) -> Option<V> {
		self.current.load().get(key).cloned()
	}

	pub fn contains_key(&self, key: &K) -> bool {
		self.current.load().contains_key(key)
	}

	pub fn len(&self) -> usize {
		self.current.load().len()
	}

	pub fn is_empty(&self) -> bool {
		self.current.load().is_empty()
	}

	pub fn keys(&self) -> Vec<K> {
		self.current.load().iter().map(|(k, _)| k.clone()).collect()
	}

	pub fn values(&self) -> Vec<V> {
		self.current.load().iter().map(|(_, v)| v.clone()).collect()
	}

	pub fn to_vec(&self) -> Vec<(K, V)> {
		self.current.load().iter().map(|(k, v)| (k.clone(), v.clone())).collect()
	}

	/// Swaps in the map `op` builds from the current snapshot, with the commit guard held.
	///
	/// The descriptor is staged before the guard is released and delivered after.
	fn commit<R>(&self, op: impl FnOnce(&Snapshot<K, V, M>) -> Result<(R, Staged<K, V, M>)>) -> Result<R> {
		let permit = self.writer.lock()?;
		let outcome = self.apply(op);
		drop(permit);
		self.notifier.flush();
		outcome
	}

	fn apply<R>(&self, op: impl FnOnce(&Snapshot<K, V, M>) -> Result<(R, Staged<K, V, M>)>) -> Result<R> {
		let current = self.snapshot();
		let (value, staged) = op(&current)?;
		if let Some((next, change)) = staged {
			tracing::trace!(action = change.action().as_str(), len = next.len(), "snapshot.commit");
			self.current.store(Arc::new(next));
			self.notifier.stage(change);
		}
		Ok(value)
	}

	/// Sets `key` to `value`, returning the previous value.
	///
	/// Publishes `Replace` when the key existed and `Add` otherwise.
	pub fn insert(&self, key: K, value: V) -> Result<Option<V>> {
		self.commit(|snap| {
			let mut next = snap.to_map();
			let old = next.insert(key.clone(), value.clone());
			let change = match &old {
				Some(old) => ChangeDescriptor::replaced(vec![(key.clone(), value)], vec![(key, old.clone())], None),
				None => ChangeDescriptor::added(vec![(key, value)], None),
			};
			Ok((old, Some((next, change))))
		})
	}

	/// Removes `key`, returning its value. Absent keys publish nothing.
	pub fn remove(&self, key: &K) -> Result<Option<V>> {
		self.commit(|snap| {
			if !snap.contains_key(key) {
				return Ok((None, None));
			}
			let mut next = snap.to_map();
			let Some(old) = next.remove(key) else {
				return Ok((None, None));
			};
			let change = ChangeDescriptor::removed(vec![(key.clone(), old.clone())], None);
			Ok((Some(old), Some((next, change))))
		})
	}

	/// Removes every entry.
	pub fn clear(&self) -> Result<()> {
		self.commit(|_| Ok(((), Some((M::default(), ChangeDescriptor::reset())))))
	}

	/// Upserts every entry as one change, returning how many were written.
	pub fn extend(&self, entries: impl IntoIterator<Item = (K, V)>) -> Result<usize> {
		let entries: Vec<(K, V)> = entries.into_iter().collect();
		self.commit(|snap| {
			if entries.is_empty() {
				return Ok((0, None));
			}
			let mut next = snap.to_map();
			let count = entries.len();
			for (k, v) in entries {
				next.insert(k, v);
			}
			Ok((count, Some((next, ChangeDescriptor::reset()))))
		})
	}

	/// Removes every listed key as one change, returning how many were present.
	pub fn remove_range<'k>(&self, keys: impl IntoIterator<Item = &'k K>) -> Result<usize>
	where
		K: 'k,
	{
		let keys: Vec<&K> = keys.into_iter().collect();
		self.commit(|snap| {
			let mut next = snap.to_map();
			let removed = keys.into_iter().filter(|key| next.remove(key).is_some()).count();
			if removed == 0 {
				return Ok((0, None));
			}
			Ok((removed, Some((next, ChangeDescriptor::reset()))))
		})
	}

	/// Commits the map `transform` derives from the current snapshot.
	///
	/// Waits for the commit guard (cooperatively on affinity threads). Returns `Ok(false)` without
	/// swapping or publishing when `transform` returns `None`.
	pub fn do_operation(&self, transform: impl FnOnce(&Snapshot<K, V, M>) -> Option<M>) -> Result<bool> {
		self.commit(|snap| Ok(transactional(snap, transform)))
	}

	/// Like [`do_operation`](Self::do_operation), but returns `false` at once, without calling
	/// `transform`, if another writer holds the commit guard.
	pub fn try_operation(&self, transform: impl FnOnce(&Snapshot<K, V, M>) -> Option<M>) -> bool {
		let Some(permit) = self.writer.try_lock() else {
			tracing::trace!("snapshot.try_operation.busy");
			return false;
		};
		let committed = self.apply(|snap| Ok(transactional(snap, transform))).unwrap_or(false);
		drop(permit);
		self.notifier.flush();
		committed
	}

	pub fn notifier(&self) -> &ChangeNotifier<Entry<K, V>> {
		&self.notifier
	}

	pub fn subscribe(&self, callback: impl FnMut(&ChangeDescriptor<Entry<K, V>>) + Send + 'static) -> SubscriptionId {
		self.notifier.subscribe(callback)
	}

	pub fn subscribe_on(
		&self,
		context: Arc<dyn AffinityContext>,
		callback: impl FnMut(&ChangeDescriptor<Entry<K, V>>) + Send + 'static,
	) -> SubscriptionId {
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

impl<K, V, M> ObservableAssociativeSnapshot<K, V, M>
where
	K: Clone + Debug + Send + Sync + 'static,
	V: Clone + Send + Sync + 'static,
	M: MapBackend<K, V>,
{
	/// Adds a new entry. Fails with [`CollectionError::DuplicateKey`] if `key` is present.
	pub fn add(&self, key: K, value: V) -> Result<()> {
		self.commit(|snap| {
			let next = snap.with_inserted(key.clone(), value.clone()).ok_or_else(|| duplicate(&key))?;
			Ok(((), Some((next, ChangeDescriptor::added(vec![(key, value)], None)))))
		})
	}

	/// Adds every entry as one change. Any duplicate, against the map or within `entries`,
	/// rejects the whole batch.
	pub fn add_range(&self, entries: impl IntoIterator<Item = (K, V)>) -> Result<usize> {
		let entries: Vec<(K, V)> = entries.into_iter().collect();
		self.commit(|snap| {
			if entries.is_empty() {
				return Ok((0, None));
			}
			let mut next = snap.to_map();
			let count = entries.len();
			for (k, v) in entries {
				if next.contains_key(&k) {
					return Err(duplicate(&k));
				}
				next.insert(k, v);
			}
			Ok((count, Some((next, ChangeDescriptor::reset()))))
		})
	}
}

impl<K, V, M> Default for ObservableAssociativeSnapshot<K, V, M>
where
	K: Clone + Send + Sync + 'static,
	V: Clone + Send + Sync + 'static,
	M: MapBackend<K, V>,
{
	fn default() -> Self {
		Self::new()
	}
}

impl<K, V, M> FromIterator<(K, V)> for ObservableAssociativeSnapshot<K, V, M>
where
	K: Clone + Send + Sync + 'static,
	V: Clone + Send + Sync + 'static,
	M: MapBackend<K, V>,
{
	fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
		let mut map = M::default();
		for (k, v) in iter {
			map.insert(k, v);
		}
		Self::from_map(map, GuardConfig::default())
	}
}

impl<K, V, M: MapBackend<K, V>> Debug for ObservableAssociativeSnapshot<K, V, M> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ObservableAssociativeSnapshot")
			.field("len", &self.current.load().len())
			.field("strategy", &self.writer.config().strategy)
			.field("notifier", &self.notifier)
			.finish()
	}
}

fn transactional<K, V, M>(snap: &Snapshot<K, V, M>, transform: impl FnOnce(&Snapshot<K, V, M>) -> Option<M>) -> (bool, Staged<K, V, M>)
where
	M: MapBackend<K, V>,
{
	match transform(snap) {
		Some(next) => (true, Some((next, ChangeDescriptor::reset()))),
		None => {
			tracing::trace!("snapshot.operation.cancelled");
			(false, None)
		}
	}
}

fn duplicate<K: Debug>(key: &K) -> CollectionError {
	CollectionError::DuplicateKey { key: format!("{key:?}") }
}
