use std::collections::{BTreeMap, HashMap, btree_map, hash_map};
use std::hash::{BuildHasher, Hash};

/// Map storage usable behind a [`super::Snapshot`].
///
/// Implementations are plain owned maps; the container clones them to build the next snapshot.
pub trait MapBackend<K, V>: Clone + Default + Send + Sync + 'static {
	type Iter<'a>: Iterator<Item = (&'a K, &'a V)>
	where
		Self: 'a,
		K: 'a,
		V: 'a;

	fn get(&self, key: &K) -> Option<&V>;

	fn contains_key(&self, key: &K) -> bool {
		self.get(key).is_some()
	}

	fn insert(&mut self, key: K, value: V) -> Option<V>;

	fn remove(&mut self, key: &K) -> Option<V>;

	fn len(&self) -> usize;

	fn is_empty(&self) -> bool {
		self.len() == 0
	}

	fn clear(&mut self);

	fn iter(&self) -> Self::Iter<'_>;
}

impl<K, V, S> MapBackend<K, V> for HashMap<K, V, S>
where
	K: Eq + Hash + Clone + Send + Sync + 'static,
	V: Clone + Send + Sync + 'static,
	S: BuildHasher + Default + Clone + Send + Sync + 'static,
{
	type Iter<'a>
		= hash_map::Iter<'a, K, V>
	where
		Self: 'a,
		K: 'a,
		V: 'a;

	fn get(&self, key: &K) -> Option<&V> {
		HashMap::get(self, key)
	}

	fn insert(&mut self, key: K, value: V) -> Option<V> {
		HashMap::insert(self, key, value)
	}

	fn remove(&mut self, key: &K) -> Option<V> {
		HashMap::remove(self, key)
	}

	fn len(&self) -> usize {
		HashMap::len(self)
	}

	fn clear(&mut self) {
		HashMap::clear(self);
	}

	fn iter(&self) -> Self::Iter<'_> {
		HashMap::iter(self)
	}
}

impl<K, V> MapBackend<K, V> for BTreeMap<K, V>
where
	K: Ord + Clone + Send + Sync + 'static,
	V: Clone + Send + Sync + 'static,
{
	type Iter<'a>
		= btree_map::Iter<'a, K, V>
	where
		Self: 'a,
		K: 'a,
		V: 'a;

	fn get(&self, key: &K) -> Option<&V> {
		BTreeMap::get(self, key)
	}

	fn insert(&mut self, key: K, value: V) -> Option<V> {
		BTreeMap::insert(self, key, value)
	}

	fn remove(&mut self, key: &K) -> Option<V> {
		BTreeMap::remove(self, key)
	}

	fn len(&self) -> usize {
		BTreeMap::len(self)
	}

	fn clear(&mut self) {
		BTreeMap::clear(self);
	}

	fn iter(&self) -> Self::Iter<'_> {
		BTreeMap::iter(self)
	}
}
